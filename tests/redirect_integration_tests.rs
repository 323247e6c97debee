//! Integration tests for the resource redirector
//!
//! These tests verify:
//! - Enable/Disable round-trips restore the original source content
//! - Link and copy tiers leave equivalent visible state
//! - Idempotent Enable via operation-marker self-healing
//! - Wildcard mappings never link and never create backup slots
//! - Scratch-directory cleanup honors the retention policy

use camino::{Utf8Path, Utf8PathBuf};
use portalizer::config::LauncherConfig;
use portalizer::models::{SessionSettings, WildcardRetention};
use portalizer::platform::testing::{DeniedLinks, RecordingHelper};
use portalizer::platform::{Links, StdLinks};
use portalizer::services::ResourceRedirector;
use portalizer::session::SessionContext;
use tempfile::TempDir;

fn utf8_root(temp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap()
}

/// Builds a session whose single directory mapping redirects
/// `<root>/host/Vendor` into the portable store, via an env-var-shaped
/// profile line.
fn dir_mapping_context(root: &Utf8Path, var: &str) -> SessionContext {
    std::env::set_var(var, root.join("host").as_str());
    let profile = LauncherConfig {
        dir_map: vec![format!("%{var}%\\Vendor")],
        ..LauncherConfig::default()
    };
    SessionContext::new(
        root.join("Launcher.exe"),
        profile,
        SessionSettings::default(),
        &[],
    )
}

fn file_mapping_context(root: &Utf8Path, var: &str, line: &str, simple: bool) -> SessionContext {
    std::env::set_var(var, root.join("host").as_str());
    let profile = LauncherConfig {
        file_map: vec![line.to_string()],
        file_map_simple: simple,
        ..LauncherConfig::default()
    };
    SessionContext::new(
        root.join("Launcher.exe"),
        profile,
        SessionSettings::default(),
        &[],
    )
}

fn seed_source_dir(ctx: &SessionContext) -> Utf8PathBuf {
    let source = ctx.dir_mappings[0].source.clone();
    std::fs::create_dir_all(source.join("nested")).unwrap();
    std::fs::write(source.join("config.ini"), "original").unwrap();
    std::fs::write(source.join("nested/deep.txt"), "deep").unwrap();
    source
}

fn assert_original_content(dir: &Utf8Path) {
    assert_eq!(
        std::fs::read_to_string(dir.join("config.ini")).unwrap(),
        "original"
    );
    assert_eq!(
        std::fs::read_to_string(dir.join("nested/deep.txt")).unwrap(),
        "deep"
    );
}

#[test]
fn test_directory_round_trip_copy_tier() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    let ctx = dir_mapping_context(&root, "PORTA_RT_COPY");
    let source = seed_source_dir(&ctx);
    let destination = ctx.dir_mappings[0].destination.clone();
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);

    redirector.enable_directories();

    // Link/copy equivalence: visible source content equals the store.
    assert_original_content(&source);
    assert_original_content(&destination);
    // The original waits in the backup slot while redirection is active.
    let backup = ctx.dir_mappings[0].backup_slot(ctx.machine_id);
    assert!(backup.is_dir());

    redirector.disable_directories();

    assert_original_content(&source);
    assert_original_content(&destination);
    assert!(!backup.exists(), "backup slot must be consumed on disable");
    assert!(!ctx.operation_marker("dir-redirect").exists());
}

#[test]
fn test_directory_round_trip_link_tier() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    let ctx = dir_mapping_context(&root, "PORTA_RT_LINK");
    let source = seed_source_dir(&ctx);
    let destination = ctx.dir_mappings[0].destination.clone();
    let links = StdLinks;
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &links, &helper);

    redirector.enable_directories();

    assert!(links.is_link(&source));
    assert_original_content(&source);
    assert_original_content(&destination);

    redirector.disable_directories();

    assert!(!links.is_link(&source));
    assert_original_content(&source);
    assert_original_content(&destination);
    assert!(!ctx.dir_mappings[0].backup_slot(ctx.machine_id).exists());
}

#[test]
fn test_enable_twice_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    let ctx = dir_mapping_context(&root, "PORTA_RT_IDEM");
    let source = seed_source_dir(&ctx);
    let destination = ctx.dir_mappings[0].destination.clone();
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);

    redirector.enable_directories();
    // Second Enable without an intervening Disable: the stale operation
    // marker forces a repair pass first.
    redirector.enable_directories();

    assert_original_content(&source);
    assert_original_content(&destination);
    let backup = ctx.dir_mappings[0].backup_slot(ctx.machine_id);
    assert!(backup.is_dir());
    // Still exactly one backup slot, not a nested or duplicated one.
    assert!(!Utf8PathBuf::from(format!("{backup}-{{{}}}.backup", ctx.machine_id)).exists());

    redirector.disable_directories();
    assert_original_content(&source);
    assert!(!backup.exists());
}

#[test]
fn test_in_session_changes_persist_to_store() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    let ctx = dir_mapping_context(&root, "PORTA_RT_WRITE");
    let source = seed_source_dir(&ctx);
    let destination = ctx.dir_mappings[0].destination.clone();
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);

    redirector.enable_directories();
    // The app writes new state while redirected.
    std::fs::write(source.join("config.ini"), "changed").unwrap();
    std::fs::write(source.join("session.dat"), "fresh").unwrap();
    redirector.disable_directories();

    // The store keeps the in-session changes; the host got its original
    // content back.
    assert_eq!(
        std::fs::read_to_string(destination.join("config.ini")).unwrap(),
        "changed"
    );
    assert_eq!(
        std::fs::read_to_string(destination.join("session.dat")).unwrap(),
        "fresh"
    );
    assert_eq!(
        std::fs::read_to_string(source.join("config.ini")).unwrap(),
        "original"
    );
    assert!(!source.join("session.dat").exists());
}

#[test]
fn test_file_round_trip_with_backup_slot() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    let ctx = file_mapping_context(&root, "PORTA_RT_FILE", "%PORTA_RT_FILE%\\settings.cfg", false);
    let mapping = &ctx.file_mappings[0];
    std::fs::create_dir_all(mapping.source.parent().unwrap()).unwrap();
    std::fs::write(&mapping.source, "host settings").unwrap();
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);

    redirector.enable_files();

    let backup = mapping.backup_slot(ctx.machine_id);
    assert!(backup.is_file());
    assert_eq!(
        std::fs::read_to_string(&mapping.source).unwrap(),
        std::fs::read_to_string(&mapping.destination).unwrap()
    );

    std::fs::write(&mapping.source, "edited in session").unwrap();
    redirector.disable_files();

    assert_eq!(
        std::fs::read_to_string(&mapping.source).unwrap(),
        "host settings"
    );
    assert_eq!(
        std::fs::read_to_string(&mapping.destination).unwrap(),
        "edited in session"
    );
    assert!(!backup.exists());
}

#[test]
fn test_wildcard_mapping_never_links_never_backs_up() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    let ctx = file_mapping_context(&root, "PORTA_RT_WILD", "%PORTA_RT_WILD%\\logs\\*.log", false);
    let mapping = &ctx.file_mappings[0];
    assert!(mapping.is_wildcard());

    let source_dir = mapping.source.parent().unwrap();
    let dest_dir = mapping.destination.parent().unwrap();
    std::fs::create_dir_all(dest_dir).unwrap();
    std::fs::write(dest_dir.join("run1.log"), "one").unwrap();
    std::fs::write(dest_dir.join("run2.log"), "two").unwrap();
    std::fs::write(dest_dir.join("other.txt"), "not matched").unwrap();

    let links = StdLinks;
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &links, &helper);

    redirector.enable_files();

    assert_eq!(
        std::fs::read_to_string(source_dir.join("run1.log")).unwrap(),
        "one"
    );
    assert_eq!(
        std::fs::read_to_string(source_dir.join("run2.log")).unwrap(),
        "two"
    );
    assert!(!source_dir.join("other.txt").exists());
    assert!(!links.is_link(&source_dir.join("run1.log")));
    // No backup slot is ever created for a wildcard mapping.
    assert!(!mapping.backup_slot(ctx.machine_id).exists());

    std::fs::write(source_dir.join("run3.log"), "three").unwrap();
    redirector.disable_files();

    // Matches moved back into the store, source vacated.
    assert!(!source_dir.join("run1.log").exists());
    assert!(!source_dir.join("run3.log").exists());
    assert_eq!(
        std::fs::read_to_string(dest_dir.join("run3.log")).unwrap(),
        "three"
    );
    assert!(!mapping.backup_slot(ctx.machine_id).exists());
}

#[test]
fn test_simple_file_mapping_newer_store_wins() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    let ctx = file_mapping_context(&root, "PORTA_RT_SIMPLE", "%PORTA_RT_SIMPLE%\\prefs.ini", true);
    let mapping = &ctx.file_mappings[0];
    let dest = &mapping.destination;
    std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
    std::fs::write(dest, "stored prefs").unwrap();
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);

    // Source missing: the stored copy materializes in place.
    redirector.enable_files();
    assert_eq!(
        std::fs::read_to_string(&mapping.source).unwrap(),
        "stored prefs"
    );

    std::fs::write(&mapping.source, "updated by app").unwrap();
    redirector.disable_files();

    assert!(!mapping.source.exists());
    assert_eq!(std::fs::read_to_string(dest).unwrap(), "updated by app");
}

#[test]
fn test_secure_mappings_forward_to_helper() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    std::env::set_var("PORTA_RT_SEC", root.as_str());
    let profile = LauncherConfig {
        file_secure_map: vec![
            "%PORTA_RT_SEC%\\Data\\hosts > %PORTA_RT_SEC%\\etc\\hosts".to_string(),
        ],
        ..LauncherConfig::default()
    };
    let ctx = SessionContext::new(
        root.join("Launcher.exe"),
        profile,
        SessionSettings::default(),
        &[],
    );
    let mapping = &ctx.secure_mappings[0];
    std::fs::create_dir_all(mapping.source.parent().unwrap()).unwrap();
    std::fs::write(&mapping.source, "portable hosts").unwrap();

    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);

    redirector.enable_secure_files();
    assert_eq!(
        std::fs::read_to_string(&mapping.destination).unwrap(),
        "portable hosts"
    );
    assert!(helper.requests()[0].starts_with("copy "));

    redirector.disable_secure_files();
    assert!(!mapping.destination.exists());
    assert!(helper.requests().iter().any(|r| r.starts_with("delete ")));
}

#[test]
fn test_scratch_cleanup_keeps_newest_by_name() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    std::env::set_var("PORTA_RT_SCRATCH", root.as_str());
    for version in ["1.0.1", "1.0.2", "1.0.10"] {
        std::fs::create_dir_all(root.join(format!("cache/app-{version}/tmp"))).unwrap();
    }
    let profile = LauncherConfig {
        rm_dirs: vec!["%PORTA_RT_SCRATCH%\\cache\\app-*".to_string()],
        ..LauncherConfig::default()
    };
    let ctx = SessionContext::new(
        root.join("Launcher.exe"),
        profile,
        SessionSettings::default(),
        &[],
    );
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);

    redirector.remove_scratch_dirs();

    // Lexicographically last name survives (a heuristic for "most recent").
    assert!(root.join("cache/app-1.0.2").is_dir());
    assert!(!root.join("cache/app-1.0.1").exists());
    assert!(!root.join("cache/app-1.0.10").exists());
}

#[test]
fn test_scratch_cleanup_keep_none_policy() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    std::env::set_var("PORTA_RT_SCRATCH2", root.as_str());
    for version in ["a", "b"] {
        std::fs::create_dir_all(root.join(format!("cache/run-{version}"))).unwrap();
    }
    let profile = LauncherConfig {
        rm_dirs: vec!["%PORTA_RT_SCRATCH2%\\cache\\run-*".to_string()],
        wildcard_retention: WildcardRetention::KeepNone,
        ..LauncherConfig::default()
    };
    let ctx = SessionContext::new(
        root.join("Launcher.exe"),
        profile,
        SessionSettings::default(),
        &[],
    );
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);

    redirector.remove_scratch_dirs();

    assert!(!root.join("cache/run-a").exists());
    assert!(!root.join("cache/run-b").exists());
    assert!(root.join("cache").is_dir());
}

#[test]
fn test_single_wildcard_match_is_retained() {
    let temp = TempDir::new().unwrap();
    let root = utf8_root(&temp);
    std::env::set_var("PORTA_RT_SCRATCH3", root.as_str());
    std::fs::create_dir_all(root.join("cache/only-one")).unwrap();
    let profile = LauncherConfig {
        rm_dirs: vec!["%PORTA_RT_SCRATCH3%\\cache\\only-*".to_string()],
        ..LauncherConfig::default()
    };
    let ctx = SessionContext::new(
        root.join("Launcher.exe"),
        profile,
        SessionSettings::default(),
        &[],
    );
    let helper = RecordingHelper::new();
    let redirector = ResourceRedirector::new(&ctx, &DeniedLinks, &helper);

    redirector.remove_scratch_dirs();

    assert!(root.join("cache/only-one").is_dir());
}

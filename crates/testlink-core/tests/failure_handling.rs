//! Integration tests for per-file failures: unreadable sources and edits
//! that cannot be written back

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use testlink_core::sync::{Orchestrator, SyncOptions};

fn write(root: &Path, path: &str, text: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, text).unwrap();
}

fn read(root: &Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

// ============================================================================
// Fixtures
// ============================================================================

const INVOICE_SERVICE: &str = r"<?php

namespace App\Locked;

class InvoiceService
{
    public function issue(): void
    {
    }
}
";

const INVOICE_TEST: &str = r"<?php

namespace Tests\Unit;

use App\Locked\InvoiceService;

class InvoiceServiceTest
{
    #[LinksAndCovers(InvoiceService::class, 'issue')]
    public function testIssue(): void
    {
    }
}
";

const ORDER_SERVICE: &str = r"<?php

namespace App;

class OrderService
{
    public function place(): void
    {
    }
}
";

const ORDER_TEST: &str = r"<?php

namespace Tests\Unit;

use App\OrderService;

class OrderServiceTest
{
    #[LinksAndCovers(OrderService::class, 'place')]
    public function testPlace(): void
    {
    }
}
";

const LOCKED_PATH: &str = "src/Locked/InvoiceService.php";
const ORDER_PATH: &str = "src/OrderService.php";

fn two_services() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), LOCKED_PATH, INVOICE_SERVICE);
    write(dir.path(), "tests/Unit/InvoiceServiceTest.php", INVOICE_TEST);
    write(dir.path(), ORDER_PATH, ORDER_SERVICE);
    write(dir.path(), "tests/Unit/OrderServiceTest.php", ORDER_TEST);
    dir
}

fn assert_order_service_synced(root: &Path) {
    let order = read(root, ORDER_PATH);
    assert!(order.contains("#[TestedBy(\\Tests\\Unit\\OrderServiceTest::class, 'testPlace')]"));
    assert!(order.contains("@see \\Tests\\Unit\\OrderServiceTest::testPlace"));
}

// ============================================================================
// Unreadable Sources
// ============================================================================

#[test]
fn non_utf8_file_is_skipped_with_warning() {
    let dir = two_services();
    let broken = dir.path().join("src/Broken.php");
    fs::write(&broken, [b'<', b'?', b'p', b'h', b'p', b'\n', 0xff, 0xfe, 0xfd]).unwrap();

    let orchestrator = Orchestrator::open(dir.path(), None).unwrap();
    assert!(orchestrator.tree().get("src/Broken.php").is_none());
    assert_eq!(orchestrator.tree().len(), 4);
    assert!(orchestrator
        .tree()
        .warnings
        .iter()
        .any(|w| w.starts_with("src/Broken.php:")));

    let report = orchestrator.validate();
    assert!(report.warnings.iter().any(|w| w.contains("src/Broken.php")));
    assert_eq!(report.validation.total_links, 2);
}

#[test]
fn sync_proceeds_past_unreadable_file() {
    let dir = two_services();
    fs::write(dir.path().join("src/Broken.php"), [0xc3, 0x28]).unwrap();

    let mut orchestrator = Orchestrator::open(dir.path(), None).unwrap();
    let result = orchestrator.sync(&SyncOptions::default()).unwrap();
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    assert_eq!(result.modified_files, vec![LOCKED_PATH, ORDER_PATH]);
    assert!(result.warnings.iter().any(|w| w.contains("src/Broken.php")));
}

// ============================================================================
// Write Failures
// ============================================================================

#[test]
fn file_replaced_after_scan_is_collected_and_others_proceed() {
    let dir = two_services();
    let mut orchestrator = Orchestrator::open(dir.path(), None).unwrap();

    // The scanned file becomes a directory, so it can be neither read nor
    // replaced at commit time.
    let locked = dir.path().join(LOCKED_PATH);
    fs::remove_file(&locked).unwrap();
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join("keep"), "x").unwrap();

    let result = orchestrator.sync(&SyncOptions::default()).unwrap();
    assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
    assert!(result.errors[0].contains(LOCKED_PATH), "{}", result.errors[0]);
    assert_eq!(result.modified_files, vec![ORDER_PATH]);

    assert!(locked.is_dir());
    assert_eq!(fs::read_to_string(locked.join("keep")).unwrap(), "x");
    assert_order_service_synced(dir.path());
}

#[cfg(unix)]
#[test]
fn read_only_directory_keeps_original_and_others_proceed() {
    use std::os::unix::fs::PermissionsExt;

    let dir = two_services();
    let locked_dir = dir.path().join("src/Locked");
    fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o555)).unwrap();

    // Privileged users ignore directory permissions; nothing to observe then.
    let canary = locked_dir.join("canary");
    if fs::write(&canary, "").is_ok() {
        fs::remove_file(&canary).unwrap();
        fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let mut orchestrator = Orchestrator::open(dir.path(), None).unwrap();
    let result = orchestrator.sync(&SyncOptions::default()).unwrap();
    fs::set_permissions(&locked_dir, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
    assert!(result.errors[0].contains(LOCKED_PATH), "{}", result.errors[0]);
    assert_eq!(result.modified_files, vec![ORDER_PATH]);
    assert_eq!(read(dir.path(), LOCKED_PATH), INVOICE_SERVICE);
    assert_order_service_synced(dir.path());
}

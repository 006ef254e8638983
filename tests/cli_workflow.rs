//! End-to-end tests of the CLI runners on temporary projects

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use testlink::cli::{open, run_fix_refs, run_pair, run_sync, run_validate, OutputFormat};
use testlink::SyncOptions;

const SERVICE: &str = r"<?php

namespace App;

use Tests\Unit\InvoiceServiceTest;

class InvoiceService
{
    /**
     * Issues an invoice.
     *
     * @see InvoiceServiceTest::testIssue
     */
    #[TestedBy(InvoiceServiceTest::class, 'testIssue')]
    public function issue(): void
    {
    }

    #[TestedBy('@totals')]
    public function total(): int
    {
        return 0;
    }
}
";

const SERVICE_TEST: &str = r"<?php

namespace Tests\Unit;

use App\InvoiceService;

class InvoiceServiceTest
{
    #[LinksAndCovers(InvoiceService::class, 'issue')]
    public function testIssue(): void
    {
    }

    #[LinksAndCovers('@totals')]
    public function testTotal(): void
    {
    }
}
";

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, text) in [
        ("src/InvoiceService.php", SERVICE),
        ("tests/Unit/InvoiceServiceTest.php", SERVICE_TEST),
    ] {
        let full = dir.path().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, text).unwrap();
    }
    dir
}

fn json(rendered: &str) -> serde_json::Value {
    serde_json::from_str(rendered).unwrap()
}

fn read(root: &Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

#[test]
fn validate_reports_placeholders_and_short_refs() {
    let dir = project();
    let orchestrator = open(dir.path(), None).unwrap();
    let output = run_validate(&orchestrator, OutputFormat::Json).unwrap();
    let value = json(&output.rendered);
    assert_eq!(value["status"], "ok");
    assert_eq!(value["schema_version"], "1");
    assert_eq!(value["validation"]["total_links"], 1);
    assert_eq!(value["name_issues"][0]["original"], "InvoiceServiceTest::testIssue");
    assert_eq!(
        value["name_issues"][0]["resolved"],
        "\\Tests\\Unit\\InvoiceServiceTest::testIssue"
    );
}

#[test]
fn pair_fix_refs_then_sync_converge() {
    let dir = project();

    let mut orchestrator = open(dir.path(), None).unwrap();
    let paired = json(&run_pair(&mut orchestrator, Some("@totals"), false, OutputFormat::Json).unwrap());
    assert_eq!(paired["summary"][0], "@totals: 1 production × 1 test = 1 link");
    assert_eq!(paired["dry_run"], false);

    let fixed = json(&run_fix_refs(&mut orchestrator, false, OutputFormat::Json).unwrap());
    assert_eq!(fixed["fixed"], 1);
    assert!(read(dir.path(), "src/InvoiceService.php")
        .contains("     * @see \\Tests\\Unit\\InvoiceServiceTest::testIssue\n"));

    let synced = run_sync(&mut orchestrator, &SyncOptions::default(), OutputFormat::Text).unwrap();
    assert!(synced.contains("file(s) modified"));

    // A second sync over the converged tree changes nothing.
    let mut reopened = open(dir.path(), None).unwrap();
    let again = json(&run_sync(&mut reopened, &SyncOptions::default(), OutputFormat::Json).unwrap());
    assert_eq!(again["modified_files"].as_array().unwrap().len(), 0);
    assert!(run_validate(&reopened, OutputFormat::Text).unwrap().valid);
}

#[test]
fn dry_run_sync_leaves_project_untouched() {
    let dir = project();
    let mut orchestrator = open(dir.path(), None).unwrap();
    let options = SyncOptions {
        dry_run: true,
        ..Default::default()
    };
    let text = run_sync(&mut orchestrator, &options, OutputFormat::Text).unwrap();
    assert!(text.starts_with("Dry run: "));
    assert_eq!(read(dir.path(), "src/InvoiceService.php"), SERVICE);
    assert_eq!(read(dir.path(), "tests/Unit/InvoiceServiceTest.php"), SERVICE_TEST);
}

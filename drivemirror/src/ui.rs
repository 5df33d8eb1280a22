use std::time::Duration;

use byte_unit::AdjustedByte;
use drivemirror::session::SessionReport;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use treemirror::{Error, Failure, MirrorResult, Progress};

pub fn adjusted_byte(val: u64) -> AdjustedByte {
    use byte_unit::{Byte, UnitType};

    let byte = Byte::from(val);
    byte.get_appropriate_unit(UnitType::Binary)
}

/// Shows the progress events of a pass until the channel closes.
pub async fn follow(mut rx: mpsc::UnboundedReceiver<Progress>, what: String) {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_prefix(what);
    spinner.enable_steady_tick(Duration::from_millis(120));

    let mut count = 0usize;
    let mut bytes = 0u64;
    while let Some(progress) = rx.recv().await {
        count += 1;
        match progress {
            Progress::Container { path, created } => {
                let verb = if created { "created" } else { "entering" };
                spinner.set_message(format!("{verb} {path}/"));
            }
            Progress::Leaf { path, bytes: sz } => {
                bytes += sz;
                spinner.set_message(format!(
                    "[{count}] {path} ({:#.1} total)",
                    adjusted_byte(bytes)
                ));
            }
            Progress::Skipped { path } => {
                spinner.set_message(format!("unchanged {path}"));
            }
            Progress::Failed(failure) => {
                spinner.suspend(|| eprintln!("  {}", describe(&failure)));
            }
        }
    }
    spinner.finish_and_clear();
}

/// The errors raised by the traversal already name the path
fn describe(failure: &Failure) -> String {
    match &failure.error {
        Error::List { .. } | Error::Create { .. } | Error::Transfer { .. } => {
            failure.error.to_string()
        }
        err => format!("{}: {err}", failure.path),
    }
}

fn print_result(label: &str, res: &MirrorResult) {
    println!("{label}:");
    println!(
        "  containers: {} created, {} reused",
        res.containers_created, res.containers_reused
    );
    println!(
        "  files:      {} transferred ({:#.2}), {} unchanged",
        res.leaves_transferred,
        adjusted_byte(res.bytes_transferred),
        res.leaves_skipped
    );
    if res.failures.is_empty() {
        return;
    }
    println!("  {} failure(s):", res.failures.len());
    for failure in res.failures.iter() {
        println!("    {}", describe(failure));
    }
}

pub fn print_report(report: &SessionReport) {
    if let Some(bucket) = &report.bucket {
        print_result("Bucket", bucket);
    }
    print_result(&format!("Drive {}", report.direction), &report.drive);
    if !report.is_success() {
        println!("Some entries could not be mirrored. See the failures above.");
    }
}

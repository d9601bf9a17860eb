use schemata_db::{ApplyReport, MigrationStatus};

pub fn print_apply(report: &ApplyReport) {
    if report.applied.is_empty() {
        println!(
            "Database is up to date ({} migration{} already applied).",
            report.skipped,
            plural(report.skipped)
        );
        return;
    }

    for file in &report.applied {
        println!("  applied  {file}");
    }
    println!(
        "All migrations applied successfully! ({} applied, {} already up to date)",
        report.applied.len(),
        report.skipped
    );
}

pub fn print_status(status: &MigrationStatus) {
    let width = status
        .applied
        .iter()
        .map(|r| r.name.len())
        .chain(status.pending.iter().map(String::len))
        .chain(status.missing.iter().map(String::len))
        .max()
        .unwrap_or(0);

    println!("Database time  {}", status.server_time);
    println!();

    if status.applied.is_empty() && status.pending.is_empty() {
        println!("No migrations found.");
    }
    for record in &status.applied {
        println!(
            "  applied  {:<width$}  {}",
            record.name,
            record.applied_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    for name in &status.pending {
        println!("  pending  {name}");
    }
    for name in &status.missing {
        println!("  missing  {name:<width$}  (recorded, not on disk)");
    }

    println!();
    if status.is_up_to_date() {
        println!("Up to date.");
    } else {
        println!(
            "{} pending migration{}. Run `schemata up` to apply.",
            status.pending.len(),
            plural(status.pending.len())
        );
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

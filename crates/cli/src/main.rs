//! `materialflow-report`: aggregate material usage from snapshot files.
//!
//! **Usage:**
//! ```bash
//! materialflow-report --work-orders work_orders.json --billing invoices.json \
//!     --top 10 --category kitchen --with paint
//! ```
//!
//! Each input file is a JSON array of documents carrying an `id` plus the
//! collection's fields. The listings are replayed through a short-lived engine
//! (configured from the `MATERIALFLOW_*` environment, see `EngineConfig`);
//! elements without a usable `id` are listed as unreadable instead of failing
//! the run. The report is written to stdout as JSON; logs go to stderr.

mod report;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value as JsonValue;
use tracing::info;

use materialflow_core::AccountId;
use materialflow_feeds::Collection;
use materialflow_infra::EngineConfig;

use crate::report::{run_report, Listing, ReportRequest};

/// One-shot materials-usage report
#[derive(Parser, Debug)]
#[clap(name = "materialflow-report")]
#[clap(about = "Aggregate material usage from work order and billing snapshots")]
struct Args {
    /// Work order snapshot (JSON array)
    #[clap(long, value_name = "FILE", env = "MATERIALFLOW_WORK_ORDERS")]
    work_orders: Option<PathBuf>,

    /// Billing document snapshot (JSON array)
    #[clap(long, value_name = "FILE", env = "MATERIALFLOW_BILLING")]
    billing: Option<PathBuf>,

    /// Account the snapshots belong to
    #[clap(long, default_value = "local", env = "MATERIALFLOW_ACCOUNT")]
    account: String,

    /// Number of materials per list
    #[clap(long, default_value = "10", env = "MATERIALFLOW_TOP")]
    top: usize,

    /// Also list materials used in categories matching this text
    #[clap(long, value_name = "QUERY")]
    category: Option<String>,

    /// Also list materials commonly used together with this one
    #[clap(long = "with", value_name = "MATERIAL")]
    with_material: Option<String>,

    /// Give up if the engine has not published within this many milliseconds
    #[clap(long, default_value = "10000", env = "MATERIALFLOW_TIMEOUT_MS")]
    timeout_ms: u64,

    /// Pretty-print the JSON report
    #[clap(long)]
    pretty: bool,
}

fn load_listing(collection: Collection, path: Option<&Path>) -> Result<Listing> {
    let Some(path) = path else {
        return Ok(Listing::empty(collection));
    };

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let values: Vec<JsonValue> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {} as a JSON array", path.display()))?;

    let listing = Listing::from_values(collection, values);
    info!(
        path = %path.display(),
        collection = %collection,
        documents = listing.documents.len(),
        unreadable = listing.unreadable.len(),
        "snapshot loaded"
    );
    Ok(listing)
}

fn main() -> Result<()> {
    materialflow_observability::init();

    let args = Args::parse();
    if args.work_orders.is_none() && args.billing.is_none() {
        anyhow::bail!("nothing to report: pass --work-orders and/or --billing");
    }

    let config = EngineConfig::from_env().context("Invalid engine configuration")?;
    let account = AccountId::new(args.account).context("Invalid --account")?;
    let work_orders = load_listing(Collection::WorkOrders, args.work_orders.as_deref())?;
    let billing = load_listing(Collection::BillingDocuments, args.billing.as_deref())?;

    let request = ReportRequest {
        limit: args.top,
        category: args.category,
        with_material: args.with_material,
    };
    let report = run_report(
        config,
        account,
        work_orders,
        billing,
        &request,
        Duration::from_millis(args.timeout_ms),
    )?;
    info!(
        materials = report.distinct_materials,
        quarantined = report.quarantined,
        unreadable = report.unreadable.len(),
        "aggregation complete"
    );

    let out = if args.pretty {
        serde_json::to_string_pretty(&report)
    } else {
        serde_json::to_string(&report)
    }
    .context("Failed to serialize report")?;
    println!("{out}");

    Ok(())
}

//! # socket-shadow - library usage example
//!
//! Shows three common patterns for consuming the security gate as a Rust
//! library:
//!
//! 1. **Gate an in-memory diff** - plug your own resolver into `ResolverGate`
//! 2. **Decide without a resolver** - call `walk_diff` and `decide` directly
//! 3. **Inspect the report** - traverse the violations for custom logic
//!
//! Run with:
//!   cargo run --example gate_as_lib

use anyhow::Result;
use async_trait::async_trait;
use socket_shadow::{
    decide,
    domain::collaborators::{MapAlertService, MapPolicySource, MemorySink},
    presentation::writers::writer_for,
    walk_diff, Alert, AlertsByPurl, DecisionOptions, DependencyResolver, DiffFilter, DiffRequest, DiffTree,
    FoldLevel, PolicyAction, Report, ResolvedPackageNode, SecurityPolicy, SessionContext, ShadowError,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    gate_in_memory().await?;
    decide_directly()?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// A toy resolver: the diff is fixed, and commit just says what it would do.
// ─────────────────────────────────────────────────────────────────────────────
struct FixedResolver(DiffTree);

#[async_trait]
impl DependencyResolver for FixedResolver {
    async fn compute_diff(&self, _request: &DiffRequest) -> Result<DiffTree> {
        Ok(self.0.clone())
    }

    async fn commit(&self, diff: &DiffTree) -> Result<()> {
        println!("commit: writing {} change(s) to node_modules", diff.children.len());
        Ok(())
    }
}

fn sample_diff() -> DiffTree {
    let registry = |name: &str, version: &str| {
        ResolvedPackageNode::new(name, version)
            .with_origin(&format!("https://registry.npmjs.org/{name}/-/{name}-{version}.tgz"))
    };
    DiffTree::root(vec![
        DiffTree::add(registry("tslib", "1.14.1")),
        DiffTree::change(registry("left-pad", "1.2.0"), registry("left-pad", "1.3.0")),
    ])
}

fn sample_alerts() -> AlertsByPurl {
    let alert = |alert_type: &str, file: &str| Alert {
        alert_type: alert_type.into(),
        severity: "middle".into(),
        file: file.into(),
        start: 10,
        end: 42,
        props: serde_json::Value::Null,
    };
    [
        ("pkg:npm/tslib@1.14.1".to_string(), vec![alert("envVars", "tslib.js")]),
        ("pkg:npm/left-pad@1.3.0".to_string(), vec![alert("shellAccess", "index.js")]),
    ]
    .into()
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 1 - wrap a resolver in the gate. A blocked diff never reaches
// `commit`, and the report still lands in the sink.
// ─────────────────────────────────────────────────────────────────────────────
async fn gate_in_memory() -> Result<()> {
    println!("=== Pattern 1: gating an in-memory resolver ===\n");

    let sink = Arc::new(MemorySink::default());
    let policy = SecurityPolicy::from_actions([("envVars", PolicyAction::Warn), ("shellAccess", PolicyAction::Error)]);

    let outcome = socket_shadow::gate(
        SessionContext::default(),
        Arc::new(FixedResolver(sample_diff())),
        Arc::new(MapAlertService::new(sample_alerts())),
        Arc::new(MapPolicySource::new(policy)),
        sink.clone(),
        &DiffRequest::default(),
    )
    .await;

    match outcome {
        Ok(Some(report)) => println!("approved: {}", report.report_id),
        Ok(None) => println!("approved without a check: alerts unavailable"),
        Err(e) => match e.downcast_ref::<ShadowError>() {
            Some(blocked @ ShadowError::Blocked { .. }) => {
                println!("{blocked} (exit code {})", blocked.exit_code())
            }
            _ => return Err(e),
        },
    }

    if let Some(report) = sink.reports().last() {
        inspect_report(report);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 2 - no resolver at all: walk the diff and decide yourself.
// Useful in CI, where the diff comes from a lockfile comparison.
// ─────────────────────────────────────────────────────────────────────────────
fn decide_directly() -> Result<()> {
    println!("=== Pattern 2: walk + decide ===\n");

    let details = walk_diff(&sample_diff(), &DiffFilter::default())?;
    for d in &details {
        match &d.existing {
            Some(old) => println!("  ~ {} {} → {}", d.node.name, old.version, d.node.version),
            None => println!("  + {} {}", d.node.name, d.node.version),
        }
    }

    let policy = SecurityPolicy::from_actions([("envVars", PolicyAction::Monitor)]);
    let options = DecisionOptions {
        fold: FoldLevel::Pkg,
        report_level: PolicyAction::Monitor,
        ..DecisionOptions::default()
    };
    let decision = decide(&sample_alerts(), &policy, &options)?;
    let report = Report::new(decision, options.fold, options.report_level, details.len());

    let md = writer_for("md").ok_or_else(|| anyhow::anyhow!("markdown writer missing"))?;
    println!("\n{}", md.format(&report)?);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Pattern 3 - the report is plain serialisable data.
// ─────────────────────────────────────────────────────────────────────────────
fn inspect_report(report: &Report) {
    println!("\n=== Pattern 3: inspecting the report ===\n");
    println!("id      : {}", report.report_id);
    println!("healthy : {}", report.healthy);
    for row in report.violations.rows() {
        println!(
            "  [{}] {} in {}@{}",
            row.leaf.policy,
            row.leaf.alert_type,
            row.package,
            row.version.unwrap_or("*"),
        );
    }
    println!(
        "\n  {} finding(s), {} blocking, {} package(s) checked\n",
        report.summary.total_violations, report.summary.blocking, report.summary.packages_checked
    );
}

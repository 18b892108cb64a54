use std::io::Write;

use anyhow::Result;
use readnorm_core::{Error, FlatRecord, ProjectionConfig, QualityReport};
use serde_json::json;

/// One JSON object per record, cells rendered with the sentinel markers.
pub fn write_records<'a>(
    out: &mut impl Write,
    records: impl Iterator<Item = &'a FlatRecord>,
    config: &ProjectionConfig,
    final_only: bool,
) -> Result<()> {
    for record in records.filter(|r| !final_only || r.is_final) {
        let line = json!({
            "document_id": record.document_id,
            "cluster_id": record.cluster_id,
            "annotator_id": record.annotator_id,
            "annotator_index": record.annotator_index,
            "is_final": record.is_final,
            "cells": record.render(config),
        });
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

pub fn report_failures(failed: &[(String, Error)]) {
    for (id, error) in failed {
        eprintln!("failed: {id}: {error}");
    }
}

pub fn report_quality(report: &QualityReport) {
    eprintln!(
        "{} processed, {} without data, {} failed, {} records, {} warnings",
        report.documents,
        report.no_data,
        report.failed,
        report.records,
        report.warning_count()
    );
    for (kind, count) in &report.by_kind {
        eprintln!("  {kind}: {count}");
    }
    for (path, count) in &report.by_path {
        eprintln!("  {path}: {count}");
    }
}

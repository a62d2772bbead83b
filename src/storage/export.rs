//! CSV and JSON renderings of harvest results.

use std::io;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::models::{Comment, Item, Metrics, MetricsSource};
use crate::pipeline::{HarvestOutcome, HarvestWarning};

#[derive(Serialize)]
struct CsvRow<'a> {
    number: usize,
    id: &'a str,
    author: &'a str,
    text: &'a str,
    timestamp: String,
}

/// Write items as CSV with columns `number,id,author,text,timestamp`.
pub fn write_csv<W: io::Write>(items: &[Item], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for (i, item) in items.iter().enumerate() {
        wtr.serialize(CsvRow {
            number: i + 1,
            id: &item.id,
            author: &item.author,
            text: &item.text,
            timestamp: item.timestamp.to_rfc3339(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct DateRange {
    first: DateTime<Utc>,
    last: DateTime<Utc>,
}

#[derive(Serialize)]
struct JsonItem<'a> {
    id: &'a str,
    author: &'a str,
    text: &'a str,
    timestamp: &'a DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<&'a Metrics>,

    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_metrics: Option<&'a Metrics>,

    #[serde(skip_serializing_if = "Option::is_none")]
    metrics_source: Option<MetricsSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    comments: Option<&'a [Comment]>,
}

impl<'a> JsonItem<'a> {
    fn new(item: &'a Item, with_enrichment: bool) -> Self {
        Self {
            id: &item.id,
            author: &item.author,
            text: &item.text,
            timestamp: &item.timestamp,
            metrics: with_enrichment.then_some(&item.metrics),
            estimated_metrics: if with_enrichment {
                item.estimated_metrics.as_ref()
            } else {
                None
            },
            metrics_source: with_enrichment.then_some(item.metrics_source),
            comments: (with_enrichment && !item.comments.is_empty())
                .then_some(item.comments.as_slice()),
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    subject: String,
    count: usize,
    date_range: Option<DateRange>,
    warnings: &'a [HarvestWarning],
    items: Vec<JsonItem<'a>>,
}

fn date_range(items: &[Item]) -> Option<DateRange> {
    let first = items.iter().map(|i| i.timestamp).min()?;
    let last = items.iter().map(|i| i.timestamp).max()?;
    Some(DateRange { first, last })
}

/// Render an outcome as pretty JSON. Metrics and comments are included only
/// when enrichment was requested.
pub fn to_json(outcome: &HarvestOutcome) -> Result<Vec<u8>> {
    let with_enrichment = outcome.enrichment_requested;
    let report = JsonReport {
        subject: outcome.subject.to_string(),
        count: outcome.items.len(),
        date_range: date_range(&outcome.items),
        warnings: &outcome.warnings,
        items: outcome
            .items
            .iter()
            .map(|item| JsonItem::new(item, with_enrichment))
            .collect(),
    };
    Ok(serde_json::to_vec_pretty(&report)?)
}

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::{
    features::resource::{DetailColumns as _, Resource},
    util::age_since,
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResourceTableRow {
    pub namespace: String,
    pub name: String,
    pub kind: String,
    pub row: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ResourceTable {
    pub header: Vec<String>,
    pub rows: Vec<ResourceTableRow>,
}

/// The NAMESPACE column is shown unless every row lives in the same namespace.
pub fn insert_ns(namespaces: &BTreeSet<&str>) -> bool {
    namespaces.len() != 1
}

fn insert_kind(kinds: &BTreeSet<&str>) -> bool {
    kinds.len() > 1
}

impl ResourceTable {
    pub fn header(&self) -> &Vec<String> {
        &self.header
    }

    pub fn rows(&self) -> &Vec<ResourceTableRow> {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: impl Into<ResourceTableRow>) {
        let row = row.into();

        debug_assert!(
            self.header.len() == row.row.len(),
            "Mismatch header({}) != row({})",
            self.header.len(),
            row.row.len()
        );

        self.rows.push(row);
    }

    /// Rows for already filtered and sorted resources.
    ///
    /// Per-kind detail columns are added when all rows share the same shape.
    pub fn build(resources: &[&Resource], now: DateTime<Utc>) -> Self {
        let namespaces: BTreeSet<&str> = resources.iter().map(|r| r.namespace.as_str()).collect();
        let kinds: BTreeSet<&str> = resources.iter().map(|r| r.kind.as_str()).collect();

        let insert_ns = insert_ns(&namespaces) && !resources.is_empty();
        let insert_kind = insert_kind(&kinds);

        let details_header = resources
            .first()
            .map(|r| r.details.header())
            .filter(|header| resources.iter().all(|r| r.details.header() == *header))
            .unwrap_or_default();

        let mut header: Vec<String> = Vec::new();

        if insert_ns {
            header.push("NAMESPACE".into());
        }
        header.push("NAME".into());
        if insert_kind {
            header.push("KIND".into());
        }
        header.push("STATUS".into());
        header.extend(details_header.iter().map(ToString::to_string));
        header.push("AGE".into());

        let mut table = Self {
            header,
            ..Default::default()
        };

        for resource in resources {
            let mut row = Vec::with_capacity(table.header.len());

            if insert_ns {
                row.push(resource.namespace.to_string());
            }
            row.push(resource.name.to_string());
            if insert_kind {
                row.push(resource.kind.to_string());
            }
            row.push(resource.status.to_string());
            if !details_header.is_empty() {
                row.extend(resource.details.columns());
            }
            row.push(age_since(resource.created_at(), now));

            table.push_row(ResourceTableRow {
                namespace: resource.namespace.to_string(),
                name: resource.name.to_string(),
                kind: resource.kind.to_string(),
                row,
            });
        }

        table
    }

    /// Plain text with columns aligned on display width.
    pub fn render(&self) -> String {
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.width()).collect();

        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(&row.row) {
                *width = (*width).max(cell.width());
            }
        }

        let line = |cells: &[String]| {
            let mut line = cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| {
                    let pad = width.saturating_sub(cell.width());
                    format!("{}{}", cell, " ".repeat(pad))
                })
                .collect::<Vec<_>>()
                .join("   ");

            line.truncate(line.trim_end().len());
            line
        };

        let mut out = vec![line(&self.header)];
        out.extend(self.rows.iter().map(|row| line(&row.row)));

        out.join("\n")
    }
}

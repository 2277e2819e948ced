//! Synthetic sample tables for trying the engine out.

use crate::error::Result;
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::io;
use std::path::Path;
use tracing::info;

pub const DEFAULT_SEED: u64 = 42;

const DEPARTMENTS: &[&str] = &["Sales", "Marketing", "IT", "HR", "Finance"];
const REGIONS: &[&str] = &["North", "South", "East", "West"];
const CATEGORIES: &[&str] = &["Electronics", "Clothing", "Home & Garden", "Sports", "Books"];
const PAYMENT_METHODS: &[&str] = &["Credit Card", "Cash", "Debit Card", "Online"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Employees,
    Sales,
}

/// Write `rows` synthetic rows of the given kind as CSV. The same seed
/// always produces the same file.
pub fn write_sample(kind: SampleKind, rows: usize, seed: u64, out: &Path) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut writer = csv::Writer::from_path(out).map_err(io::Error::from)?;

    let (headers, records) = match kind {
        SampleKind::Employees => employees(&mut rng, rows),
        SampleKind::Sales => sales(&mut rng, rows),
    };
    writer.write_record(headers).map_err(io::Error::from)?;
    for record in &records {
        writer.write_record(record).map_err(io::Error::from)?;
    }
    writer.flush()?;

    info!("Wrote {} sample {:?} rows to {}", rows, kind, out.display());
    Ok(())
}

fn pick<'a>(rng: &mut StdRng, options: &[&'a str]) -> &'a str {
    options.choose(rng).copied().unwrap_or_default()
}

fn employees(rng: &mut StdRng, rows: usize) -> (&'static [&'static str], Vec<Vec<String>>) {
    let headers: &'static [&'static str] = &[
        "Employee ID",
        "Name",
        "Age",
        "Department",
        "Salary",
        "Years Experience",
        "Remote Work",
        "Performance Rating",
        "Hire Date",
    ];
    let first_hire = NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default();
    let records = (1..=rows)
        .map(|id| {
            let hired = first_hire + Duration::days(rng.gen_range(0..5000));
            vec![
                id.to_string(),
                format!("Employee_{}", id),
                rng.gen_range(22..65).to_string(),
                pick(rng, DEPARTMENTS).to_string(),
                rng.gen_range(30_000..120_000).to_string(),
                rng.gen_range(0..25).to_string(),
                pick(rng, &["Yes", "No"]).to_string(),
                rng.gen_range(1..=5).to_string(),
                hired.format("%Y-%m-%d").to_string(),
            ]
        })
        .collect();
    (headers, records)
}

fn sales(rng: &mut StdRng, rows: usize) -> (&'static [&'static str], Vec<Vec<String>>) {
    let headers: &'static [&'static str] = &[
        "Transaction ID",
        "Customer Age",
        "Region",
        "Product Category",
        "Sale Amount",
        "Payment Method",
        "Satisfaction Score",
        "Discount Applied",
    ];
    let records = (1..=rows)
        .map(|id| {
            vec![
                id.to_string(),
                rng.gen_range(18..80).to_string(),
                pick(rng, REGIONS).to_string(),
                pick(rng, CATEGORIES).to_string(),
                format!("{:.2}", rng.gen_range(10.0..1000.0)),
                pick(rng, PAYMENT_METHODS).to_string(),
                rng.gen_range(1..10).to_string(),
                pick(rng, &["Yes", "No"]).to_string(),
            ]
        })
        .collect();
    (headers, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::load_path;
    use crate::schema::{ColumnType, SchemaInferencer};

    #[test]
    fn test_sample_is_reproducible_and_typed() {
        let dir = std::env::temp_dir();
        let first = dir.join(format!("datachat-sample-{}.csv", uuid::Uuid::new_v4()));
        let second = dir.join(format!("datachat-sample-{}.csv", uuid::Uuid::new_v4()));
        write_sample(SampleKind::Employees, 50, DEFAULT_SEED, &first).unwrap();
        write_sample(SampleKind::Employees, 50, DEFAULT_SEED, &second).unwrap();

        assert_eq!(std::fs::read_to_string(&first).unwrap(), std::fs::read_to_string(&second).unwrap());

        let schema = SchemaInferencer::default().infer(&load_path(&first).unwrap()).unwrap();
        assert_eq!(schema.row_count, 50);
        assert_eq!(schema.column_type("salary"), Some(ColumnType::Numeric));
        assert_eq!(schema.column_type("department"), Some(ColumnType::Categorical));
        assert_eq!(schema.column_type("remote_work"), Some(ColumnType::Binary));
        assert_eq!(schema.column_type("hire_date"), Some(ColumnType::Datetime));

        std::fs::remove_file(&first).ok();
        std::fs::remove_file(&second).ok();
    }
}

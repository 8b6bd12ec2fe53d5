use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, BooleanArray, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

use super::sampler::SampleRecord;

/// Column names of a chain table, in order.
pub const CHAIN_COLUMNS: [&str; 6] = ["j", "ratio", "accept", "temp", "vz", "pref"];

// ---------------------------------------------------------------------------
// ChainRow – one line of the chain table
// ---------------------------------------------------------------------------

/// Flat, persisted form of a [`SampleRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRow {
    pub j: u64,
    pub ratio: f64,
    pub accept: bool,
    pub temp: f64,
    pub vz: f64,
    pub pref: f64,
}

impl From<&SampleRecord> for ChainRow {
    fn from(r: &SampleRecord) -> Self {
        ChainRow {
            j: r.step_index as u64,
            ratio: r.acceptance_ratio,
            accept: r.accepted,
            temp: r.params.temperature,
            vz: r.params.radial_velocity,
            pref: r.params.flux_prefactor,
        }
    }
}

// ---------------------------------------------------------------------------
// Writers
// ---------------------------------------------------------------------------

/// Write a chain table.  Dispatch by extension.
///
/// * `.csv`     – header row plus one comma-separated row per step
/// * `.parquet` – flat Int64/Float64/Boolean columns
/// * anything else – whitespace-separated text with a header line
pub fn write_chain(path: &Path, records: &[SampleRecord]) -> Result<()> {
    let rows: Vec<ChainRow> = records.iter().map(ChainRow::from).collect();
    match extension(path).as_str() {
        "csv" => write_csv(path, &rows),
        "parquet" | "pq" => write_parquet(path, &rows),
        _ => write_text(path, &rows),
    }
    .with_context(|| format!("writing chain to {}", path.display()))?;
    log::info!("wrote {} chain rows to {}", rows.len(), path.display());
    Ok(())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn write_csv(path: &Path, rows: &[ChainRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    if rows.is_empty() {
        writer.write_record(CHAIN_COLUMNS)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_text(path: &Path, rows: &[ChainRow]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path).context("creating chain file")?);
    writeln!(out, "{}", CHAIN_COLUMNS.join(" "))?;
    for r in rows {
        writeln!(
            out,
            "{} {:.6e} {} {} {} {}",
            r.j,
            r.ratio,
            if r.accept { "True" } else { "False" },
            r.temp,
            r.vz,
            r.pref
        )?;
    }
    out.flush()?;
    Ok(())
}

fn chain_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("j", DataType::Int64, false),
        Field::new("ratio", DataType::Float64, false),
        Field::new("accept", DataType::Boolean, false),
        Field::new("temp", DataType::Float64, false),
        Field::new("vz", DataType::Float64, false),
        Field::new("pref", DataType::Float64, false),
    ]))
}

fn write_parquet(path: &Path, rows: &[ChainRow]) -> Result<()> {
    let schema = chain_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.j as i64))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.ratio))),
            Arc::new(BooleanArray::from(rows.iter().map(|r| r.accept).collect::<Vec<_>>())),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.temp))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.vz))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.pref))),
        ],
    )
    .context("building chain record batch")?;

    let file = File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing chain batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// Read back a `.csv` or `.parquet` chain table.
pub fn load_chain(path: &Path) -> Result<Vec<ChainRow>> {
    match extension(path).as_str() {
        "csv" => {
            let mut reader = csv::Reader::from_path(path).context("opening chain CSV")?;
            reader
                .deserialize::<ChainRow>()
                .enumerate()
                .map(|(i, row)| row.with_context(|| format!("chain CSV row {i}")))
                .collect()
        }
        "parquet" | "pq" => load_chain_parquet(path),
        other => bail!("Unsupported chain file extension: .{other}"),
    }
}

fn load_chain_parquet(path: &Path) -> Result<Vec<ChainRow>> {
    let file = File::open(path).context("opening chain parquet")?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?
        .build()
        .context("building parquet reader")?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.context("reading chain record batch")?;
        let j = column::<Int64Array>(&batch, "j")?;
        let ratio = column::<Float64Array>(&batch, "ratio")?;
        let accept = column::<BooleanArray>(&batch, "accept")?;
        let temp = column::<Float64Array>(&batch, "temp")?;
        let vz = column::<Float64Array>(&batch, "vz")?;
        let pref = column::<Float64Array>(&batch, "pref")?;
        for i in 0..batch.num_rows() {
            rows.push(ChainRow {
                j: j.value(i) as u64,
                ratio: ratio.value(i),
                accept: accept.value(i),
                temp: temp.value(i),
                vz: vz.value(i),
                pref: pref.value(i),
            });
        }
    }
    Ok(rows)
}

fn column<'b, A: Array + 'static>(batch: &'b RecordBatch, name: &str) -> Result<&'b A> {
    batch
        .column_by_name(name)
        .with_context(|| format!("chain table missing '{name}' column"))?
        .as_any()
        .downcast_ref::<A>()
        .with_context(|| format!("chain column '{name}' has unexpected type"))
}

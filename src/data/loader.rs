use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use arrow::array::{
    Array, Float32Array, Float64Array, Int32Array, Int64Array, LargeListArray, ListArray,
};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::library::{GridResolution, InMemoryLibrary, SpectralLibrary};
use super::model::{FluxVector, Observation, WavelengthGrid};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load an observed spectrum.  Dispatch by extension.
///
/// Supported formats:
/// * `.txt` / `.dat` – two whitespace-separated columns (wavelength, flux), `#` comments
/// * `.csv`          – header row with `wavelength` and `flux` columns
/// * `.json`         – `{ "wavelength": [...], "flux": [...] }`
/// * `.parquet`      – scalar Float64 `wavelength` and `flux` columns
pub fn load_observation(path: &Path) -> Result<Observation> {
    let (wavelength, flux) = match extension(path).as_str() {
        "txt" | "dat" => load_text_columns(path)?,
        "csv" => load_csv_columns(path)?,
        "json" => load_json_columns(path)?,
        "parquet" | "pq" => load_parquet_columns(path)?,
        other => bail!("Unsupported observation extension: .{other}"),
    };
    let grid = WavelengthGrid::new(wavelength).context("observation wavelengths")?;
    let obs = Observation::new(grid, FluxVector::new(flux))?;
    log::info!(
        "loaded observation {} ({} pixels, {:.2}–{:.2} Å)",
        path.display(),
        obs.len(),
        obs.grid.first(),
        obs.grid.last()
    );
    Ok(obs)
}

/// Load a synthetic spectral library.  Dispatch by extension.
///
/// One row per spectrum; `x` holds wavelengths and `y` flux, `teff` and
/// `logg` locate the row in the grid. Every row must share the same `x`.
/// * `.parquet` – `x`, `y` as List/LargeList of Float64 or Float32
/// * `.json`    – `[{ "x": [...], "y": [...], "teff": 5700, "logg": 4.5 }, ...]`
pub fn load_library(path: &Path, resolution: GridResolution) -> Result<InMemoryLibrary> {
    let rows = match extension(path).as_str() {
        "parquet" | "pq" => load_library_parquet(path)?,
        "json" => load_library_json(path)?,
        other => bail!("Unsupported library extension: .{other}"),
    };
    let library = assemble_library(rows, resolution)?;
    log::info!(
        "loaded library {} ({} spectra, {} samples each)",
        path.display(),
        library.len(),
        library.wavelengths().len()
    );
    Ok(library)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Observation loaders
// ---------------------------------------------------------------------------

fn load_text_columns(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let text = std::fs::read_to_string(path).context("reading observation text")?;
    let mut wavelength = Vec::new();
    let mut flux = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(w), Some(f)) = (fields.next(), fields.next()) else {
            bail!("Line {}: expected two columns", line_no + 1);
        };
        wavelength.push(parse_float(w, line_no + 1, "wavelength")?);
        flux.push(parse_float(f, line_no + 1, "flux")?);
    }
    Ok((wavelength, flux))
}

fn parse_float(tok: &str, line: usize, col: &str) -> Result<f64> {
    tok.parse::<f64>()
        .with_context(|| format!("Line {line}, {col}: '{tok}' is not a number"))
}

#[derive(Debug, Deserialize)]
struct ObservedRow {
    wavelength: f64,
    flux: f64,
}

fn load_csv_columns(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let mut wavelength = Vec::new();
    let mut flux = Vec::new();
    for (row_no, result) in reader.deserialize::<ObservedRow>().enumerate() {
        let row = result.with_context(|| format!("CSV row {row_no}"))?;
        wavelength.push(row.wavelength);
        flux.push(row.flux);
    }
    Ok((wavelength, flux))
}

#[derive(Debug, Deserialize)]
struct ObservedColumns {
    wavelength: Vec<f64>,
    flux: Vec<f64>,
}

fn load_json_columns(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let cols: ObservedColumns = serde_json::from_str(&text).context("parsing JSON")?;
    Ok((cols.wavelength, cols.flux))
}

fn load_parquet_columns(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut wavelength = Vec::new();
    let mut flux = Vec::new();
    for batch in read_parquet(path)? {
        for row in 0..batch.num_rows() {
            wavelength.push(scalar(&batch, "wavelength", row)?);
            flux.push(scalar(&batch, "flux", row)?);
        }
    }
    Ok((wavelength, flux))
}

// ---------------------------------------------------------------------------
// Library loaders
// ---------------------------------------------------------------------------

/// One library spectrum before assembly.
struct LibraryRow {
    teff: f64,
    logg: f64,
    x: Vec<f64>,
    y: Vec<f64>,
}

fn assemble_library(rows: Vec<LibraryRow>, resolution: GridResolution) -> Result<InMemoryLibrary> {
    let Some(first) = rows.first() else {
        bail!("Library contains no spectra");
    };
    let grid = WavelengthGrid::new(first.x.clone()).context("library wavelengths")?;
    let mut library = InMemoryLibrary::new(grid, resolution);

    for (i, row) in rows.into_iter().enumerate() {
        if row.x.len() != row.y.len() {
            bail!("Row {i}: x has {} values but y has {}", row.x.len(), row.y.len());
        }
        if row.x.as_slice() != library.wavelengths().as_slice() {
            bail!("Row {i}: wavelength axis differs from row 0");
        }
        library
            .insert(row.teff, row.logg, row.y)
            .with_context(|| format!("Row {i}: T = {}, log g = {}", row.teff, row.logg))?;
    }
    Ok(library)
}

/// Expected JSON schema (records-oriented):
///
/// ```json
/// [
///   { "x": [5150.0, 5150.01, ...], "y": [1.2e14, ...], "teff": 5700, "logg": 4.5 },
///   ...
/// ]
/// ```
fn load_library_json(path: &Path) -> Result<Vec<LibraryRow>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    records
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let obj = rec
                .as_object()
                .with_context(|| format!("Row {i} is not a JSON object"))?;
            Ok(LibraryRow {
                teff: json_number(obj.get("teff"), i, "teff")?,
                logg: json_number(obj.get("logg"), i, "logg")?,
                x: json_array_to_f64(obj.get("x"), i, "x")?,
                y: json_array_to_f64(obj.get("y"), i, "y")?,
            })
        })
        .collect()
}

fn json_number(val: Option<&JsonValue>, row: usize, col: &str) -> Result<f64> {
    val.and_then(|v| v.as_f64())
        .with_context(|| format!("Row {row}: missing or non-numeric '{col}'"))
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

/// Expected schema:
/// - `x`, `y`: List<Float64> or LargeList<Float64> (Float32 inner also accepted)
/// - `teff`, `logg`: Float64, Float32, Int64 or Int32
fn load_library_parquet(path: &Path) -> Result<Vec<LibraryRow>> {
    let mut rows = Vec::new();
    for batch in read_parquet(path)? {
        let x_col = named_column(&batch, "x")?;
        let y_col = named_column(&batch, "y")?;
        for row in 0..batch.num_rows() {
            rows.push(LibraryRow {
                teff: scalar(&batch, "teff", row)?,
                logg: scalar(&batch, "logg", row)?,
                x: extract_f64_list(x_col, row)
                    .with_context(|| format!("Row {row}: failed to read 'x'"))?,
                y: extract_f64_list(y_col, row)
                    .with_context(|| format!("Row {row}: failed to read 'y'"))?,
            });
        }
    }
    Ok(rows)
}

// -- Parquet / Arrow helpers --

fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;
    reader
        .map(|batch| batch.context("reading parquet record batch"))
        .collect()
}

fn named_column<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b Arc<dyn Array>> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("Parquet file missing '{name}' column"))
}

/// Read a numeric scalar cell as `f64`.
fn scalar(batch: &RecordBatch, name: &str, row: usize) -> Result<f64> {
    let col = named_column(batch, name)?;
    if col.is_null(row) {
        bail!("Row {row}: null '{name}'");
    }
    let any = col.as_any();
    let value = match col.data_type() {
        DataType::Float64 => any.downcast_ref::<Float64Array>().map(|a| a.value(row)),
        DataType::Float32 => any.downcast_ref::<Float32Array>().map(|a| a.value(row) as f64),
        DataType::Int64 => any.downcast_ref::<Int64Array>().map(|a| a.value(row) as f64),
        DataType::Int32 => any.downcast_ref::<Int32Array>().map(|a| a.value(row) as f64),
        other => bail!("Column '{name}' has type {other:?}, expected a number"),
    };
    value.with_context(|| format!("Column '{name}' could not be downcast"))
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Builder, ListBuilder};
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_text_observation_skips_comments() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "23.txt", "# order 23\n5168.0 1.0\n5169.0  0.95 # line\n\n5170.0\t1.0\n");
        let obs = load_observation(&path).unwrap();
        assert_eq!(obs.grid.as_slice(), &[5168.0, 5169.0, 5170.0]);
        assert_eq!(obs.flux.as_slice(), &[1.0, 0.95, 1.0]);
    }

    #[test]
    fn test_csv_and_json_observation() {
        let dir = TempDir::new().unwrap();
        let csv_path = write(&dir, "obs.csv", "wavelength,flux\n5168,1.0\n5169,0.95\n");
        let json_path = write(&dir, "obs.json", r#"{"wavelength": [5168, 5169], "flux": [1.0, 0.95]}"#);
        let a = load_observation(&csv_path).unwrap();
        let b = load_observation(&json_path).unwrap();
        assert_eq!(a.grid, b.grid);
        assert_eq!(a.flux, b.flux);
    }

    #[test]
    fn test_unsorted_observation_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.txt", "5169.0 1.0\n5168.0 1.0\n");
        assert!(load_observation(&path).is_err());
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "obs.fits", "");
        assert!(load_observation(&path).is_err());
    }

    #[test]
    fn test_json_library() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "lib.json",
            r#"[{"x": [1, 2, 3], "y": [2, 4, 6], "teff": 5700, "logg": 4.5},
                {"x": [1, 2, 3], "y": [3, 3, 3], "teff": 5800, "logg": 4.5}]"#,
        );
        let lib = load_library(&path, GridResolution::default()).unwrap();
        assert_eq!(lib.len(), 2);
        assert_eq!(lib.load_flux(5800.0, 4.5).unwrap(), vec![3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_library_axes_must_agree() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "lib.json",
            r#"[{"x": [1, 2, 3], "y": [2, 4, 6], "teff": 5700, "logg": 4.5},
                {"x": [1, 2, 4], "y": [3, 3, 3], "teff": 5800, "logg": 4.5}]"#,
        );
        assert!(load_library(&path, GridResolution::default()).is_err());
    }

    #[test]
    fn test_parquet_library() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.parquet");

        let mut x_builder = ListBuilder::new(Float64Builder::new());
        let mut y_builder = ListBuilder::new(Float64Builder::new());
        for scale in [1.0, 2.0] {
            x_builder.values().append_slice(&[10.0, 11.0, 12.0]);
            x_builder.append(true);
            y_builder.values().append_slice(&[scale, scale, scale]);
            y_builder.append(true);
        }
        let item = Arc::new(Field::new("item", DataType::Float64, true));
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::List(item.clone()), false),
            Field::new("y", DataType::List(item), false),
            Field::new("teff", DataType::Int64, false),
            Field::new("logg", DataType::Float64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(x_builder.finish()),
                Arc::new(y_builder.finish()),
                Arc::new(Int64Array::from(vec![6000, 6100])),
                Arc::new(Float64Array::from(vec![4.0, 4.0])),
            ],
        )
        .unwrap();
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let lib = load_library(&path, GridResolution::default()).unwrap();
        assert_eq!(lib.nodes(), vec![(6000.0, 4.0), (6100.0, 4.0)]);
        assert_eq!(lib.load_flux(6100.0, 4.0).unwrap(), vec![2.0; 3]);
    }
}

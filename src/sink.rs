use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::info;

use crate::config::OutputFormat;
use crate::records::{BarangayRecord, MunicipalityRecord};
use crate::store::RecordStore;

pub struct OutputPaths {
    pub municipalities: PathBuf,
    pub barangays: PathBuf,
}

/// File names embed the page range and run time so runs never collide.
pub fn file_names(first: u32, last: u32, ts: &DateTime<Local>, format: OutputFormat) -> (String, String) {
    let stamp = ts.format("%m-%d-%Y__%H-%M-%S");
    let ext = match format {
        OutputFormat::Fixed => "txt",
        OutputFormat::Csv => "csv",
        OutputFormat::Jsonl => "jsonl",
    };
    (
        format!("muni_metadata_{first}_{last}__{stamp}.{ext}"),
        format!("barangay_data_{first}_{last}__{stamp}.{ext}"),
    )
}

/// Write both artifacts into `dir`, creating it if needed.
pub fn write_files(
    store: &RecordStore,
    dir: &Path,
    pages: (u32, u32),
    ts: &DateTime<Local>,
    format: OutputFormat,
) -> Result<OutputPaths> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let (muni_name, brgy_name) = file_names(pages.0, pages.1, ts, format);
    let paths = OutputPaths {
        municipalities: dir.join(muni_name),
        barangays: dir.join(brgy_name),
    };

    let mut muni_out = create(&paths.municipalities)?;
    let mut brgy_out = create(&paths.barangays)?;
    write_records(store, format, &mut muni_out, &mut brgy_out)?;
    muni_out.flush()?;
    brgy_out.flush()?;

    info!(
        municipalities = %paths.municipalities.display(),
        barangays = %paths.barangays.display(),
        "wrote output"
    );
    Ok(paths)
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let f = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(BufWriter::new(f))
}

/// Municipalities in key order; each municipality's barangays in key order.
/// Placeholder municipalities contribute barangay lines only.
pub fn write_records<M: Write, B: Write>(
    store: &RecordStore,
    format: OutputFormat,
    muni_out: &mut M,
    brgy_out: &mut B,
) -> Result<()> {
    if format == OutputFormat::Csv {
        return write_csv(store, muni_out, brgy_out);
    }
    for (_, entry) in store.municipalities() {
        if let Some(m) = &entry.record {
            match format {
                OutputFormat::Jsonl => json_line(muni_out, m)?,
                _ => muni_out.write_all(muni_line(m).as_bytes())?,
            }
        }
        for b in entry.barangays.values() {
            match format {
                OutputFormat::Jsonl => json_line(brgy_out, b)?,
                _ => brgy_out.write_all(barangay_line(b).as_bytes())?,
            }
        }
    }
    Ok(())
}

/// Same columns and order as the fixed-width layout; fields holding commas
/// or quotes are quoted by the writer.
fn write_csv<M: Write, B: Write>(store: &RecordStore, muni_out: &mut M, brgy_out: &mut B) -> Result<()> {
    let mut munis = csv::WriterBuilder::new().has_headers(false).from_writer(muni_out);
    let mut brgys = csv::WriterBuilder::new().has_headers(false).from_writer(brgy_out);
    for (_, entry) in store.municipalities() {
        if let Some(m) = &entry.record {
            munis.write_record([
                &m.name,
                &m.code,
                &m.province,
                &m.income_class,
                &m.registered_voters,
                &m.population,
                &m.land_area,
            ])?;
        }
        for b in entry.barangays.values() {
            brgys.write_record([&b.muni_name, &b.name, &b.code, &b.urban_rural, &b.population])?;
        }
    }
    munis.flush()?;
    brgys.flush()?;
    Ok(())
}

fn json_line<W: Write, T: serde::Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    Ok(())
}

fn muni_line(m: &MunicipalityRecord) -> String {
    format!(
        "{:<50} {:<15} {:<50} {:<10} {:<15} {:<15} {:<25}\n",
        format!("{},", m.name),
        format!("{},", m.code),
        format!("{},", m.province),
        format!("{},", m.income_class),
        format!("{},", m.registered_voters),
        format!("{},", m.population),
        m.land_area,
    )
}

fn barangay_line(b: &BarangayRecord) -> String {
    format!(
        "{:<50} {:<50} {:<15} {:<15} {:<15}\n",
        format!("{},", b.muni_name),
        format!("{},", b.name),
        format!("{},", b.code),
        format!("{},", b.urban_rural),
        b.population,
    )
}

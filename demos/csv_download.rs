//! Example of a record-producing host function called from a script hook.
//!
//! `ftpDownloadCsv` stands in for a download helper: it serves CSV files from
//! memory and returns their rows as a list of records, optionally restricted to
//! a set of columns. The script defines `after_action()`, which the host calls
//! once the script has been loaded.
//!
//! Run with: cargo run --example csv_download

use std::collections::HashMap;
use std::rc::Rc;

use anyhow::{bail, Context};
use script_sandbox_rs::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const TEST_DATA: &str = "\
Region,Country,Item Type,Units Sold,Unit Price
Europe,Norway,Cereal,1200,205.7
Asia,Japan,Snacks,310,152.58
Africa,Kenya,Fruits,4021,9.33
";

const SCRIPT: &str = r#"
fn after_action() {
    let columnNames = ["Region", "Country", "Units Sold"];
    let rows = ftpDownloadCsv("TEST-DATA.csv", ",", "true", "UTF-8", columnNames);

    let units = 0;
    for row in rows {
        print(`${row.Country}: ${row["Units Sold"]}`);
        units += parse_int(row["Units Sold"]);
    }
    #{ rows: rows.len(), units: units }
}

fn after_action_missing() {
    ftpDownloadCsv("MISSING.csv", ",", "true", "UTF-8", [])
}
"#;

/// In-memory file server standing in for the FTP host.
struct FakeFtp {
    files: HashMap<String, String>,
}

impl FakeFtp {
    fn download_csv(&self, args: &[HostValue]) -> anyhow::Result<HostValue> {
        let [file_name, separator, first_row_is_header, _encoding, column_names] = args else {
            bail!("ftpDownloadCsv expects 5 arguments, got {}", args.len());
        };
        let file_name = file_name.as_str().context("file name must be a string")?;
        self.read_records(file_name, separator, first_row_is_header, column_names)
            .with_context(|| format!("Failed to download CSV from FTP: {file_name}"))
    }

    fn read_records(
        &self,
        file_name: &str,
        separator: &HostValue,
        first_row_is_header: &HostValue,
        column_names: &HostValue,
    ) -> anyhow::Result<HostValue> {
        let separator = separator.as_str().context("separator must be a string")?;
        let has_header: bool = first_row_is_header
            .as_str()
            .context("header flag must be a string")?
            .parse()
            .context("header flag must be 'true' or 'false'")?;
        let text = self
            .files
            .get(file_name)
            .with_context(|| format!("no such file: {file_name}"))?;

        let mut lines = text.lines().filter(|line| !line.is_empty());
        let header: Vec<&str> = match (has_header, lines.next()) {
            (true, Some(line)) => line.split(separator).collect(),
            (true, None) => bail!("file is empty"),
            (false, _) => bail!("files without a header row are not supported"),
        };

        let wanted: Vec<String> = column_names
            .as_list()
            .map(|list| {
                list.lock()
                    .iter()
                    .filter_map(|name| name.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default();

        let rows = lines.map(|line| {
            let fields: Vec<&str> = line.split(separator).collect();
            let record = HostRecord::new();
            for (index, column) in header.iter().enumerate() {
                if wanted.is_empty() || wanted.iter().any(|w| w == column) {
                    record.insert(*column, fields.get(index).copied().unwrap_or_default());
                }
            }
            HostValue::Record(record)
        });
        Ok(HostValue::list(rows))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let ftp = Rc::new(FakeFtp {
        files: HashMap::from([("TEST-DATA.csv".to_string(), TEST_DATA.to_string())]),
    });

    let mut engine = SandboxedEngine::new(ExecutionLimits::default())?;
    let server = Rc::clone(&ftp);
    engine.set_global_function("ftpDownloadCsv", move |args: &[HostValue]| {
        server.download_csv(args)
    })?;
    engine.execute(SCRIPT)?;

    println!("=== after_action() ===");
    let summary = engine.evaluate("after_action()")?;
    println!("summary: {:?}", summary);

    println!("\n=== after_action_missing() ===");
    match engine.evaluate("after_action_missing()") {
        Ok(value) => println!("unexpected success: {:?}", value),
        Err(e) => println!("{}", e.details()),
    }

    Ok(())
}

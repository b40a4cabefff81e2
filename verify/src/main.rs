use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use serde::Serialize;

use attesta::archive::ArchiveReader;
use attesta::record::{normalize_record, StateRecord};
use attesta::source::CheckpointSource;
use attesta::tempset::MemoryTempSet;
use attesta::transform::Normalized;
use attesta::verifier::{StateVerifier, Verdict};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Archive holding the locally accumulated records
    local: PathBuf,

    /// Trusted checkpoint archive to reconcile against
    checkpoint: PathBuf,
}

#[derive(Serialize, Debug)]
struct Report {
    checkpoint: u64,
    local_records: u64,
    ignored_local_records: u64,
    verdict: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    corruption: Option<String>,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    eprintln!("attesta verifier v{}", env!("CARGO_PKG_VERSION"));

    // 1. Load and normalize the local side.
    let mut local: ArchiveReader<StateRecord> =
        ArchiveReader::open(&args.local).context("failed to open local archive")?;

    let mut verifier = StateVerifier::new(MemoryTempSet::new()).with_transform(normalize_record);
    verifier.open().context("failed to open verifier")?;

    let mut local_records = 0u64;
    let mut ignored_local_records = 0u64;
    while let Some(record) = local
        .next_record()
        .context("failed to read local archive")?
    {
        match normalize_record(&record) {
            Normalized::Keep(normalized) => {
                verifier
                    .add(&normalized)
                    .context("failed to add local record")?;
                local_records += 1;
            }
            Normalized::Ignore => ignored_local_records += 1,
        }
    }

    // 2. Stream the checkpoint against it.
    let mut source: ArchiveReader<StateRecord> =
        ArchiveReader::open(&args.checkpoint).context("failed to open checkpoint archive")?;
    let checkpoint = source.checkpoint();

    let verdict = verifier
        .verify(&mut source)
        .context("verification aborted")?;
    let corruption = verifier.state_error().map(|c| c.to_string());
    verifier.close().context("failed to close verifier")?;

    // 3. Output JSON report.
    let report = Report {
        checkpoint,
        local_records,
        ignored_local_records,
        verdict: match verdict {
            Verdict::Consistent => "consistent",
            Verdict::Corrupted => "corrupted",
        },
        corruption,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(match verdict {
        Verdict::Consistent => ExitCode::SUCCESS,
        Verdict::Corrupted => ExitCode::from(2),
    })
}

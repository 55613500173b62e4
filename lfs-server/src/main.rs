//! LFS file transfer daemon

mod args;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use lfs_common::hash;
use lfs_server::FileService;
use lfs_server::checksum::{ChecksumStatus, JobOutcome};
use lfs_server::chunks::ChunkDescriptor;
use lfs_server::constants::*;
use lfs_server::transfers::{DownloadOutcome, ResponseWriter, TransferError};

use args::{Args, Command};

/// Front-end error: service failures plus local file handling
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("{context} {path:?}: {source}")]
    Local {
        context: &'static str,
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CliError {
    fn local(context: &'static str, path: &Path) -> impl FnOnce(io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Local {
            context,
            path,
            source,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    debug!("{}{}", MSG_BANNER, env!("CARGO_PKG_VERSION"));

    let config = args.service_config();
    if let Err(e) = std::fs::create_dir_all(&config.root) {
        error!(path = %config.root.display(), error = %e, "{}", ERR_NO_STORAGE_ROOT);
        return ExitCode::FAILURE;
    }
    debug!("{}{}", MSG_STORAGE_ROOT, config.root.display());

    let service = FileService::new(config);
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let result = run(&service, args.command, &cancel).await;
    service.shutdown().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Transfer(e)) => {
            error!(kind = %e.kind(), "{e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Cancel in-flight work on Ctrl+C
async fn cancel_on_signal(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("interrupted, cancelling");
            cancel.cancel();
        }
        Err(e) => error!(error = %e, "{}", ERR_SIGNAL_CTRLC),
    }
}

async fn run(
    service: &FileService,
    command: Command,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    match command {
        Command::List => print_json(&service.list_files().await?),
        Command::Info { name } => print_json(&service.file_info(&name).await?),
        Command::Put { file, name, resume } => {
            let name = stored_name(&file, name)?;
            let mut source = File::open(&file)
                .await
                .map_err(CliError::local(ERR_OPEN_INPUT, &file))?;
            if let Some(offset) = resume {
                source
                    .seek(io::SeekFrom::Start(offset))
                    .await
                    .map_err(CliError::local(ERR_OPEN_INPUT, &file))?;
            }
            let receipt = service.save_file(&name, &mut source, resume, cancel).await?;
            print_json(&receipt)
        }
        Command::PutMany { files } => {
            let mut batch = Vec::with_capacity(files.len());
            for file in &files {
                let name = stored_name(file, None)?;
                let source = File::open(file)
                    .await
                    .map_err(CliError::local(ERR_OPEN_INPUT, file))?;
                batch.push((name, source));
            }
            print_json(&service.save_files(batch, cancel).await)
        }
        Command::PutChunked {
            file,
            name,
            chunk_size,
        } => put_chunked(service, &file, name, chunk_size, cancel).await,
        Command::Get {
            name,
            range,
            output,
        } => {
            let outcome = match &output {
                Some(path) => {
                    let mut sink = ResponseWriter::new(create_output(path).await?);
                    service
                        .download_file(&name, &mut sink, range.as_deref(), cancel)
                        .await?
                }
                None => {
                    let mut sink = ResponseWriter::new(tokio::io::stdout());
                    service
                        .download_file(&name, &mut sink, range.as_deref(), cancel)
                        .await?
                }
            };
            report_download(&name, outcome, output.is_some())
        }
        Command::GetChunk {
            name,
            index,
            size,
            output,
        } => {
            let outcome = match &output {
                Some(path) => {
                    let mut sink = ResponseWriter::new(create_output(path).await?);
                    service
                        .download_chunk(&name, &mut sink, index, size, cancel)
                        .await?
                }
                None => {
                    let mut sink = ResponseWriter::new(tokio::io::stdout());
                    service
                        .download_chunk(&name, &mut sink, index, size, cancel)
                        .await?
                }
            };
            report_download(&name, outcome, output.is_some())
        }
        Command::Check { names } => print_json(&service.check_files(&names).await),
        Command::Checksum { name, wait } => {
            let mut status = service.get_checksum(&name).await?;
            if wait && matches!(status, ChecksumStatus::InProgress { .. }) {
                status = match service.wait_for_checksum(&name).await? {
                    Some(JobOutcome::Completed(checksum)) => ChecksumStatus::Ready { checksum },
                    _ => service.get_checksum(&name).await?,
                };
            }
            print_json(&status)
        }
        Command::Progress { name } => print_json(&service.checksum_progress(&name)?),
        Command::Status { name } => print_json(&service.chunk_status(&name).await?),
        Command::Abort { name } => print_json(&service.abort_chunks(&name).await?),
    }
}

/// Split a local file into chunks and upload them in order
///
/// The whole-file MD5 is computed locally first and sent with the last chunk.
async fn put_chunked(
    service: &FileService,
    file: &Path,
    name: Option<String>,
    chunk_size: u64,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let name = stored_name(file, name)?;
    let chunk_size = chunk_size.max(1);
    let total_size = tokio::fs::metadata(file)
        .await
        .map_err(CliError::local(ERR_OPEN_INPUT, file))?
        .len();
    let total_chunks = u32::try_from(total_size.div_ceil(chunk_size).max(1)).map_err(|_| {
        TransferError::InvalidChunk(format!("{total_size} bytes need too many chunks"))
    })?;
    let md5 = hash::compute_md5(file)
        .await
        .map_err(CliError::local(ERR_OPEN_INPUT, file))?;

    let mut last = None;
    for index in 0..total_chunks {
        let start = u64::from(index) * chunk_size;
        let mut source = File::open(file)
            .await
            .map_err(CliError::local(ERR_OPEN_INPUT, file))?;
        source
            .seek(io::SeekFrom::Start(start))
            .await
            .map_err(CliError::local(ERR_OPEN_INPUT, file))?;
        let this_size = chunk_size.min(total_size - start);

        let descriptor = ChunkDescriptor {
            file_name: name.clone(),
            total_size,
            chunk_index: index,
            chunk_size: this_size,
            total_chunks,
            md5: (index + 1 == total_chunks).then(|| md5.clone()),
        };
        let receipt = service
            .save_chunk(&descriptor, &mut source.take(this_size), cancel)
            .await?;
        debug!(name = %name, index, bytes = receipt.bytes_received, "chunk sent");
        last = Some(receipt);
    }
    print_json(&last)
}

fn stored_name(file: &Path, name: Option<String>) -> Result<String, CliError> {
    if let Some(name) = name {
        return Ok(name);
    }
    file.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CliError::Local {
                context: ERR_OPEN_INPUT,
                path: file.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "no usable file name"),
            }
        })
}

async fn create_output(path: &Path) -> Result<impl AsyncWrite + Unpin + Send, CliError> {
    File::create(path)
        .await
        .map_err(CliError::local(ERR_OPEN_OUTPUT, path))
}

/// Report how a download ended; stdout carries the body unless an output file was given
fn report_download(name: &str, outcome: DownloadOutcome, to_file: bool) -> Result<(), CliError> {
    if to_file {
        return print_json(&outcome);
    }
    match outcome {
        DownloadOutcome::Completed { bytes } => debug!(name = %name, bytes, "download complete"),
        DownloadOutcome::Aborted { bytes } => info!(name = %name, bytes, "download aborted"),
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout).map_err(serde_json::Error::io)?;
    Ok(())
}

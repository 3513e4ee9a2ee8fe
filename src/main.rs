use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, span, Level};

use gcs_file_service::{
    model::file::{DeleteRequest, GetFileRequest, UploadInput, UploadStreamRequest},
    FileService, GcsFileService, StorageConfig, StorageError,
};

const STDIN_CHUNK: usize = 64 * 1024;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .json()
        .with_writer(std::io::stderr)
        .init();

    let span = span!(Level::INFO, "main", context = "main");
    let _e = span.enter();
    info!("called");

    let public_flag = || {
        clap::Arg::new("public")
            .long("public")
            .action(clap::ArgAction::SetTrue)
            .help("target the public bucket instead of the private one")
    };

    let matches = clap::Command::new("gcsfile")
        .version(clap::crate_version!())
        .arg(
            clap::Arg::new("CONFIG")
                .long("config")
                .short('c')
                .required(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand_required(true)
        .subcommand(
            clap::Command::new("upload")
                .about("upload a local file to the public bucket")
                .arg(clap::Arg::new("PATH").required(true).index(1))
                .arg(clap::Arg::new("NAME").long("name")),
        )
        .subcommand(
            clap::Command::new("upload-protected")
                .about("upload a local file to the private bucket")
                .arg(clap::Arg::new("PATH").required(true).index(1))
                .arg(clap::Arg::new("NAME").long("name")),
        )
        .subcommand(
            clap::Command::new("delete")
                .about("delete an object from the public bucket")
                .arg(clap::Arg::new("KEY").required(true).index(1)),
        )
        .subcommand(
            clap::Command::new("put")
                .about("stream stdin into NAME.EXT")
                .arg(clap::Arg::new("NAME").required(true).index(1))
                .arg(clap::Arg::new("EXT").required(true).index(2))
                .arg(public_flag()),
        )
        .subcommand(
            clap::Command::new("get")
                .about("stream an object to stdout")
                .arg(clap::Arg::new("KEY").required(true).index(1))
                .arg(public_flag()),
        )
        .subcommand(
            clap::Command::new("presign")
                .about("print a signed download url valid for seven days")
                .arg(clap::Arg::new("KEY").required(true).index(1))
                .arg(public_flag()),
        )
        .get_matches();

    let res = match matches.get_one::<PathBuf>("CONFIG") {
        Some(config) => run(config, &matches).await,
        None => Err(StorageError::config("missing --config")),
    };

    match res {
        Err(err) => {
            error!(error_message=%err, error_group="main");
            ExitCode::FAILURE
        }
        Ok(()) => ExitCode::SUCCESS,
    }
}

async fn run(config: &Path, matches: &clap::ArgMatches) -> Result<(), StorageError> {
    let config = StorageConfig::from_file(config)?;
    let fs = GcsFileService::connect(&config).await?;

    let arg = |m: &clap::ArgMatches, name: &str| -> String {
        m.get_one::<String>(name).cloned().unwrap_or_default()
    };
    let is_private = |m: &clap::ArgMatches| Some(!m.get_flag("public"));

    match matches.subcommand() {
        Some((cmd @ ("upload" | "upload-protected"), m)) => {
            let path = PathBuf::from(arg(m, "PATH"));
            let original_name = match m.get_one::<String>("NAME") {
                Some(name) => name.clone(),
                None => path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
            };
            let input = UploadInput {
                path,
                original_name,
            };

            let res = if cmd == "upload" {
                fs.upload(&input).await?
            } else {
                fs.upload_protected(&input).await?
            };
            println!("{}\t{}", res.key, res.url);
        }
        Some(("delete", m)) => {
            fs.delete(&DeleteRequest {
                file_key: arg(m, "KEY"),
            })
            .await?;
        }
        Some(("put", m)) => {
            let descriptor = fs
                .get_upload_stream_descriptor(&UploadStreamRequest {
                    name: arg(m, "NAME"),
                    ext: arg(m, "EXT"),
                    is_private: is_private(m),
                })
                .await?;
            info!(key=%descriptor.file_key, url=%descriptor.url, "streaming stdin");

            let mut stdin = tokio::io::stdin();
            let mut buf = vec![0u8; STDIN_CHUNK];
            loop {
                let n = stdin.read(&mut buf).await?;
                if n == 0 {
                    break;
                }

                // a closed sink means the upload failed, the completion carries why
                if descriptor
                    .write_stream
                    .write(Bytes::copy_from_slice(&buf[..n]))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            descriptor.write_stream.finish();

            let res = descriptor.completion.await?;
            println!("{}\t{}", res.key, res.url);
        }
        Some(("get", m)) => {
            let mut stream = fs
                .get_download_stream(&GetFileRequest {
                    file_key: arg(m, "KEY"),
                    is_private: is_private(m),
                })
                .await?;

            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.next().await {
                stdout.write_all(&chunk?).await?;
            }
            stdout.flush().await?;
        }
        Some(("presign", m)) => {
            let url = fs
                .get_presigned_download_url(&GetFileRequest {
                    file_key: arg(m, "KEY"),
                    is_private: is_private(m),
                })
                .await?;
            println!("{}", url);
        }
        _ => {}
    }

    Ok(())
}

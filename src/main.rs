use std::{path::PathBuf, process, sync::Arc};

use async_stream::try_stream;
use bytes::Bytes;
use futures::StreamExt;
use pastebin::{
    application::{
        access::PasteAccess,
        error::{AppError, ErrorReport, PasteHandlerError},
        paste::PasteHandler,
        repos::{IdGenerator, PasteCache, PasteStore, Renderer},
        tasks::{BackgroundFault, BackgroundTasks, FailurePolicy, FaultReceiver, TaskConfig},
    },
    cache::{self, CacheConfig},
    config::{self, Command, CreateArgs},
    domain::paste::{PasteId, PasteMetaToCreate, RawContent, RawStream},
    infra::{
        error::InfraError, ids::RandomIdGenerator, render::SyntectRenderer,
        storage::FsPasteStore, telemetry,
    },
};
use time::{Duration, OffsetDateTime};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    sync::oneshot,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

const READ_CHUNK_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        eprintln!("pastebin: {}", error.presentation_message());
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error("pastebin", error);
    if dispatcher::has_been_set() {
        error!(error = %error, chain = %report.joined(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = %report.joined(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let (handler, faults) = build_handler(&settings)?;
    let (stop_tx, stop_rx) = oneshot::channel();
    let drain = tokio::spawn(drain_faults(faults, stop_rx));

    let access = PasteAccess::new(handler.clone());
    let result = run_command(&access, cli_args.command).await;

    // Scheduled removals and cache writes must land before the process exits.
    handler.tasks().wait_idle().await;
    let _ = stop_tx.send(());
    let escalated = drain
        .await
        .map_err(|err| AppError::unexpected(format!("fault drain task failed: {err}")))?;

    result?;
    if escalated > 0 {
        return Err(AppError::unexpected(format!(
            "{escalated} background storage operation(s) failed"
        )));
    }
    Ok(())
}

fn build_handler(settings: &config::Settings) -> Result<(PasteHandler, FaultReceiver), AppError> {
    let store: Arc<dyn PasteStore> = Arc::new(
        FsPasteStore::new(settings.storage.root.clone()).map_err(InfraError::from)?,
    );
    let cache: Arc<dyn PasteCache> = cache::build(&CacheConfig::from(&settings.cache));
    let renderer: Arc<dyn Renderer> = Arc::new(SyntectRenderer::new());
    let ids: Arc<dyn IdGenerator> = Arc::new(RandomIdGenerator);
    let (tasks, faults) =
        BackgroundTasks::start(&TaskConfig::from(&settings.tasks), FailurePolicy::default());

    info!(
        storage_root = %settings.storage.root.display(),
        cache_enabled = settings.cache.enabled,
        workers = settings.tasks.workers.get(),
        "Paste handler ready"
    );

    let handler = PasteHandler::new(store, cache, renderer, ids, tasks)
        .with_default_lexer(settings.render.default_lexer.clone());
    Ok((handler, faults))
}

/// Log escalated faults as they arrive; returns how many were seen.
async fn drain_faults(mut faults: FaultReceiver, mut stop: oneshot::Receiver<()>) -> usize {
    let mut seen = 0;
    loop {
        tokio::select! {
            fault = faults.recv() => match fault {
                Some(fault) => {
                    log_fault(&fault);
                    seen += 1;
                }
                None => break,
            },
            _ = &mut stop => {
                while let Some(fault) = faults.try_recv() {
                    log_fault(&fault);
                    seen += 1;
                }
                break;
            }
        }
    }
    seen
}

fn log_fault(fault: &BackgroundFault) {
    let report = ErrorReport::from_error("background", fault);
    error!(
        source = report.source,
        chain = %report.joined(),
        "Escalated background failure"
    );
}

async fn run_command(access: &PasteAccess, command: Command) -> Result<(), AppError> {
    let handler = access.handler();
    match command {
        Command::Create(args) => {
            let paste_id = create(handler, args).await?;
            write_stdout(format!("{paste_id}\n").as_bytes()).await
        }
        Command::Meta(args) => {
            let paste_id = PasteId::parse(&args.id)?;
            let meta = access
                .meta(&paste_id)
                .await?
                .ok_or_else(|| AppError::NotFound(args.id.clone()))?;
            let json = serde_json::to_string_pretty(&meta)
                .map_err(|err| AppError::unexpected(format!("failed to encode meta: {err}")))?;
            write_stdout(format!("{json}\n").as_bytes()).await
        }
        Command::Raw(args) => {
            let paste_id = PasteId::parse(&args.id)?;
            let raw = access
                .raw(&paste_id)
                .await?
                .ok_or_else(|| AppError::NotFound(args.id.clone()))?;
            write_stdout(&raw).await
        }
        Command::Render(args) => {
            let paste_id = PasteId::parse(&args.id)?;
            if let Some(lexer) = args.lexer.as_deref() {
                ensure_lexer(handler.renderer(), lexer)?;
            }
            let rendered = access
                .rendered(&paste_id, args.lexer.as_deref())
                .await?
                .ok_or_else(|| AppError::NotFound(args.id.clone()))?;
            write_stdout(format!("{rendered}\n").as_bytes()).await
        }
        Command::List => {
            let mut ids = handler.all_paste_ids();
            let mut out = String::new();
            while let Some(paste_id) = ids.next().await {
                let paste_id = paste_id.map_err(PasteHandlerError::Storage)?;
                out.push_str(paste_id.as_str());
                out.push('\n');
            }
            write_stdout(out.as_bytes()).await
        }
        Command::Remove(args) => {
            let paste_id = PasteId::parse(&args.id)?;
            handler.remove_paste(&paste_id);
            info!(paste_id = %paste_id, "Paste removal scheduled");
            Ok(())
        }
        Command::PurgeExpired => {
            let report = access.purge_expired().await?;
            write_stdout(
                format!(
                    "scanned {} removed {} failed {}\n",
                    report.scanned, report.removed, report.failed
                )
                .as_bytes(),
            )
            .await
        }
        Command::Lexers => {
            let mut out = handler.renderer().lexer_names().join("\n");
            out.push('\n');
            write_stdout(out.as_bytes()).await
        }
    }
}

async fn create(handler: &PasteHandler, args: CreateArgs) -> Result<PasteId, AppError> {
    if let Some(lexer) = args.lexer.as_deref() {
        ensure_lexer(handler.renderer(), lexer)?;
    }
    let expire_dt = match args.expire_in {
        Some(seconds) => {
            let seconds = i64::try_from(seconds)
                .map_err(|_| AppError::validation("--expire-in is out of range"))?;
            Some(OffsetDateTime::now_utc() + Duration::seconds(seconds))
        }
        None => None,
    };

    let config = PasteMetaToCreate {
        expire_dt,
        lexer_name: args.lexer,
        title: args.title,
        password_hash: args.password_hash,
    }
    .validate()?;

    let raw = read_input(args.file).await?;
    Ok(handler.create_paste(args.long, raw, config).await?)
}

fn ensure_lexer(renderer: &dyn Renderer, lexer: &str) -> Result<(), AppError> {
    if renderer.is_valid_lexer(lexer) {
        Ok(())
    } else {
        Err(AppError::validation(format!("unknown lexer `{lexer}`")))
    }
}

async fn read_input(file: Option<PathBuf>) -> Result<RawContent, AppError> {
    let stream = match file {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(InfraError::from)?;
            chunked(file)
        }
        None => chunked(tokio::io::stdin()),
    };
    Ok(RawContent::Stream(stream))
}

fn chunked<R>(mut reader: R) -> RawStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    try_stream! {
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..read]);
        }
    }
    .boxed()
}

async fn write_stdout(bytes: &[u8]) -> Result<(), AppError> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(bytes).await.map_err(InfraError::from)?;
    stdout.flush().await.map_err(InfraError::from)?;
    Ok(())
}

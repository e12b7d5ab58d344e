use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use asis_ai::evidence::UploadedFile;
use asis_ai::ollama::OllamaClient;
use asis_ai::{ChatService, SessionStore};
use asis_core::config::Settings;
use asis_core::error::AppError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc::unbounded_channel;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const QUIT: &str = "/salir";
const NEW_DOCUMENT: &str = "/nuevo";
const UPLOAD_PROMPT: &str =
    "Por favor, sube un archivo PDF para comenzar! (escribe la ruta del archivo)\n> ";
const SESSION_EXPIRED: &str =
    "La sesión expiró por inactividad. Empezamos una nueva: sube el documento otra vez.";

type Input = Lines<BufReader<Stdin>>;

fn stdin_lines() -> Input {
    BufReader::new(tokio::io::stdin()).lines()
}

async fn next_line(input: &mut Input) -> Result<Option<String>, AppError> {
    input.next_line().await.map_err(|e| {
        AppError::new("IO_READ_FAILED", "Failed to read from the terminal")
            .with_details(e.to_string())
    })
}

async fn prompt(text: &str) {
    let mut out = tokio::io::stdout();
    let _ = out.write_all(text.as_bytes()).await;
    let _ = out.flush().await;
}

fn input_closed() -> AppError {
    AppError::new("SESSION_CANCELLED", "Terminal input closed")
}

async fn build_service(
    settings: &Settings,
) -> Result<(Arc<ChatService>, Option<JoinHandle<()>>), AppError> {
    let store = Arc::new(SessionStore::from_settings(settings));
    let service = Arc::new(ChatService::with_ollama(settings, store)?);

    let client = OllamaClient::new(&settings.ollama_base_url)?;
    match tokio::task::spawn_blocking(move || client.health_check()).await {
        Ok(Ok(())) => info!(base_url = %settings.ollama_base_url, "ollama reachable"),
        Ok(Err(e)) => warn!(code = %e.code, "ollama health check failed; requests may fail"),
        Err(e) => warn!(err = %e, "ollama health check task failed"),
    }

    let sweeper = settings
        .session_idle_timeout()
        .map(|t| service.spawn_idle_sweeper((t / 2).max(Duration::from_secs(1))));
    Ok((service, sweeper))
}

/// Reads one path and loads it. `/salir` or end of input closes the session.
async fn read_upload(input: &mut Input, max_bytes: u64) -> Result<UploadedFile, AppError> {
    loop {
        let Some(line) = next_line(input).await? else {
            return Err(input_closed());
        };
        let path = line.trim().trim_matches(|c: char| c == '"' || c == '\'');
        if path == QUIT {
            return Err(input_closed());
        }
        if path.is_empty() {
            continue;
        }
        return UploadedFile::from_path(Path::new(path), max_bytes);
    }
}

/// Asks for documents until one is ingested. Errors only when the user leaves.
async fn upload_flow(
    service: &ChatService,
    session_id: &str,
    input: &mut Input,
    max_bytes: u64,
) -> Result<(), AppError> {
    loop {
        prompt(UPLOAD_PROMPT).await;
        let file = match service.await_upload(read_upload(input, max_bytes)).await {
            Ok(f) => f,
            Err(e) if e.is("SESSION_CANCELLED") => return Err(e),
            Err(e) => {
                println!("{}", e.user_message());
                continue;
            }
        };
        let name = file.name.clone();
        println!("Procesando `{name}`...");
        match service.upload_document(session_id, file).await {
            Ok(summary) => {
                info!(session_id = %session_id, chunks = summary.chunk_count, "document uploaded");
                println!("Procesamiento de `{name}` finalizado. ¡Ahora puedes hacer preguntas!");
                return Ok(());
            }
            Err(e) => {
                let details = e.details.as_deref().unwrap_or("");
                warn!(code = %e.code, details, "upload failed");
                println!("{}", e.user_message());
            }
        }
    }
}

/// Errors only when the session is gone and the loop must start over.
async fn ask_and_print(
    service: &ChatService,
    session_id: &str,
    question: &str,
) -> Result<(), AppError> {
    let (tx, mut rx) = unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        let mut out = tokio::io::stdout();
        while let Some(token) = rx.recv().await {
            let _ = out.write_all(token.as_bytes()).await;
            let _ = out.flush().await;
        }
    });
    let result = service.ask_streaming(session_id, question, tx).await;
    let _ = printer.await;
    match result {
        Ok(answer) => {
            println!("\n{}", answer.sources_footer());
            Ok(())
        }
        Err(e) if session_expired(&e) => Err(e),
        Err(e) => {
            let details = e.details.as_deref().unwrap_or("");
            warn!(code = %e.code, details, "question failed");
            println!("\n{}", e.user_message());
            Ok(())
        }
    }
}

fn session_expired(e: &AppError) -> bool {
    e.is("SESSION_NOT_FOUND")
}

pub async fn run_chat(settings: Settings) -> Result<(), AppError> {
    let (service, sweeper) = build_service(&settings).await?;
    let mut session_id = service.start_session().await?;
    let mut input = stdin_lines();

    let outcome =
        chat_loop(&service, &mut session_id, &mut input, settings.upload_max_bytes).await;

    service.close_session(&session_id).await;
    if let Some(s) = sweeper {
        s.abort();
    }
    match outcome {
        Err(e) if e.is("SESSION_CANCELLED") => Ok(()),
        other => other,
    }
}

/// `session_id` is replaced when the idle sweeper expired the old one.
async fn chat_loop(
    service: &ChatService,
    session_id: &mut String,
    input: &mut Input,
    max_bytes: u64,
) -> Result<(), AppError> {
    upload_flow(service, session_id, input, max_bytes).await?;
    loop {
        prompt("\n> ").await;
        let Some(line) = next_line(input).await? else {
            return Ok(());
        };
        match line.trim() {
            "" => continue,
            QUIT => return Ok(()),
            NEW_DOCUMENT => upload_flow(service, session_id, input, max_bytes).await?,
            question => {
                if let Err(e) = ask_and_print(service, session_id, question).await {
                    info!(session_id = %session_id, code = %e.code, "session expired, starting over");
                    println!("\n{SESSION_EXPIRED}");
                    *session_id = service.start_session().await?;
                    upload_flow(service, session_id, input, max_bytes).await?;
                }
            }
        }
    }
}

pub async fn run_imc(settings: Settings) -> Result<(), AppError> {
    let (service, sweeper) = build_service(&settings).await?;
    let session_id = service.start_session().await?;
    let mut input = stdin_lines();

    println!("{}", service.bmi_greeting());
    let outcome: Result<(), AppError> = async {
        loop {
            prompt("\n> ").await;
            let Some(line) = next_line(&mut input).await? else {
                return Ok(());
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if text == QUIT {
                return Ok(());
            }
            match service.bmi_message(&session_id, text).await {
                Ok(reply) => println!("{reply}"),
                Err(e) => println!("{}", e.user_message()),
            }
        }
    }
    .await;

    service.close_session(&session_id).await;
    if let Some(s) = sweeper {
        s.abort();
    }
    outcome
}

//! Watch Job Example
//!
//! Logs in, then follows one project's pipeline events until the job finishes.
//!
//! Run with:
//! `AUTODOC_URL=http://localhost:3000 AUTODOC_EMAIL=me@example.com AUTODOC_PASSWORD=secret \
//!  cargo run -p autodoc-client --example watch_job -- <project-id>`

use autodoc_client::{
    ApiClient, HttpConfig, JobStatus,
    api::{AuthApi, ProjectsApi},
    consumer::{ConsumerConfig, StreamConsumer},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let project_id = std::env::args().nth(1).ok_or("usage: watch_job <project-id>")?;
    let base_url = std::env::var("AUTODOC_URL").unwrap_or_else(|_| "http://localhost:3000".into());
    let email = std::env::var("AUTODOC_EMAIL")?;
    let password = std::env::var("AUTODOC_PASSWORD")?;

    let client = ApiClient::new(HttpConfig::builder(base_url).build()?)?;
    let session = AuthApi::new(&client).login(&email, &password).await?;
    if let Some(user) = session.user {
        println!("Logged in as {}", user.email);
    }

    let project = ProjectsApi::new(&client).get(&project_id).await?;
    println!(
        "Project {} ({})",
        project.name,
        project.status.as_deref().unwrap_or("unknown")
    );

    let consumer = StreamConsumer::connect(&client, &project_id, ConsumerConfig::default())?;
    let mut states = consumer.subscribe();
    let mut printed = 0;
    loop {
        let snapshot = consumer.snapshot();
        for entry in &snapshot.entries[printed..] {
            println!("{:>7}  {}", entry.severity.to_string(), entry.message);
        }
        printed = snapshot.entries.len();
        if snapshot.state.is_terminal() {
            if let Some(error) = snapshot.load_error {
                eprintln!("{error}");
            }
            break;
        }
        tokio::select! {
            _ = states.changed() => {}
            () = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
        }
    }

    match consumer.status() {
        JobStatus::Done { result } => println!("Done: {}", result.unwrap_or_default()),
        JobStatus::Error { message } => println!("Failed: {message}"),
        JobStatus::Running => println!("Stream ended while the job was still running"),
    }
    Ok(())
}

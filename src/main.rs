use anyhow::{Context, Result};
use dialoguer::Password;
use reqwest::Method;
use serde_json::{Map, Value};
use std::sync::Arc;

use shrine_session_client::config::{CliArgs, Command};
use shrine_session_client::{ApiClient, ClientError, SqliteStorage, TokenStore};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::load();
    init_logging(&args.log_level, args.log_json);

    let config = args.client_config()?;

    let db_path = args.session_db_path()?;
    tracing::debug!("Session database: {}", db_path.display());
    let storage = Arc::new(SqliteStorage::open(&db_path)?);
    let store = TokenStore::open(storage);

    let client = ApiClient::new(config, store).context("Failed to initialize API client")?;

    match args.command {
        Command::Login {
            username,
            password,
            username_field,
        } => login(&client, username, password, username_field).await,
        Command::Logout => {
            client.logout().await?;
            println!("Signed out");
            Ok(())
        }
        Command::Status => {
            print_status(&client);
            Ok(())
        }
        Command::Request { method, path, data } => {
            send_request(&client, &method, &path, data.as_deref()).await
        }
    }
}

/// Initialize logging to stderr so stdout only carries response bodies
fn init_logging(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}

async fn login(
    client: &ApiClient,
    username: String,
    password: Option<String>,
    username_field: String,
) -> Result<()> {
    let password = match password {
        Some(p) => p,
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password")?,
    };

    let mut credentials = Map::new();
    credentials.insert(username_field, Value::String(username));
    credentials.insert("password".to_string(), Value::String(password));

    match client.login(&Value::Object(credentials)).await {
        Ok(()) => {
            println!("Signed in");
            Ok(())
        }
        Err(ClientError::LoginRejected { status, message }) => {
            anyhow::bail!("Login rejected ({}): {}", status, message)
        }
        Err(e) => Err(e).context("Login failed"),
    }
}

fn print_status(client: &ApiClient) {
    let session = client.session();

    println!("  Base URL:      {}", client.config().base_url);
    println!(
        "  Signed in:     {}",
        if session.is_authenticated() { "yes" } else { "no" }
    );
    println!(
        "  Can refresh:   {}",
        if session.can_refresh() { "yes" } else { "no" }
    );
    if let Some(updated_at) = session.updated_at {
        println!("  Token updated: {}", updated_at.to_rfc3339());
    }
}

async fn send_request(
    client: &ApiClient,
    method: &str,
    path: &str,
    data: Option<&str>,
) -> Result<()> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;

    let body: Option<Value> = data
        .map(serde_json::from_str)
        .transpose()
        .context("--data must be valid JSON")?;

    let response = match client.request(method, path, body.as_ref()).await {
        Ok(response) => response,
        Err(e) if e.is_session_expired() => {
            anyhow::bail!("{}\nRun `shrine-client login` to sign in again.", e)
        }
        Err(e) => return Err(e).context("Request failed"),
    };

    let status = response.status();
    let text = response.text().await.context("Failed to read response body")?;

    eprintln!("HTTP {}", status);
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or(text)
        ),
        Err(_) => println!("{}", text),
    }

    ensure_success(status)
}

/// Map a non-2xx status to an error so the process exits non-zero
fn ensure_success(status: reqwest::StatusCode) -> Result<()> {
    if !status.is_success() {
        anyhow::bail!("Request failed with HTTP {}", status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_ensure_success() {
        assert!(ensure_success(StatusCode::OK).is_ok());
        assert!(ensure_success(StatusCode::NO_CONTENT).is_ok());

        let err = ensure_success(StatusCode::NOT_FOUND).unwrap_err();
        assert!(err.to_string().contains("404"));
        assert!(ensure_success(StatusCode::UNAUTHORIZED).is_err());
    }
}

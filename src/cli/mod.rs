pub mod add;
pub mod ask;
pub mod doctor;
pub mod embed;
pub mod entries;
pub mod export;
pub mod import;
pub mod init;
pub mod stats;

use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result};
use dialoguer::Password;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use secrecy::SecretString;
use tokio::io::AsyncWriteExt;

use cairn::config::{expand_tilde, CairnConfig, EmbeddingConfig};
use cairn::crypto::MIN_PASSPHRASE_LEN;
use cairn::db::store::{self, StoredVault};
use cairn::vault::{self, Session};

const HF_BASE: &str = "https://huggingface.co/sentence-transformers";

/// Passphrase from `CAIRN_PASSPHRASE`, else an interactive prompt.
pub fn prompt_passphrase(prompt: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var("CAIRN_PASSPHRASE") {
        if !value.trim().is_empty() {
            return Ok(SecretString::from(value));
        }
    }
    anyhow::ensure!(
        std::io::stdin().is_terminal(),
        "no passphrase provided and no TTY available; set CAIRN_PASSPHRASE"
    );
    let value = Password::new()
        .with_prompt(prompt)
        .interact()
        .context("failed to read passphrase")?;
    Ok(SecretString::from(value))
}

/// New passphrase with confirmation. `env_var` lets scripted runs supply it.
pub fn prompt_new_passphrase(env_var: &str) -> Result<SecretString> {
    if let Ok(value) = std::env::var(env_var) {
        if !value.trim().is_empty() {
            return Ok(SecretString::from(value));
        }
    }
    anyhow::ensure!(
        std::io::stdin().is_terminal(),
        "no passphrase provided and no TTY available; set {env_var}"
    );
    loop {
        let value = Password::new()
            .with_prompt("New passphrase")
            .with_confirmation("Confirm passphrase", "Passphrases do not match")
            .interact()
            .context("failed to read passphrase")?;
        if value.chars().count() < MIN_PASSPHRASE_LEN {
            eprintln!("Passphrase must be at least {MIN_PASSPHRASE_LEN} characters.");
            continue;
        }
        return Ok(SecretString::from(value));
    }
}

/// Load the vault row, prompt for the passphrase and unlock it.
pub fn unlock_vault(conn: &Connection, config: &CairnConfig) -> Result<(StoredVault, Session)> {
    let stored = store::load_vault(conn)?
        .context("no vault found; run `cairn init` first")?;
    let passphrase = prompt_passphrase("Passphrase")?;
    let params = stored.params_or(config.crypto.kdf_params());
    let session = vault::unlock(&stored.record, &passphrase, &params)
        .context("failed to unlock vault")?;
    Ok((stored, session))
}

fn bar_style(template: &str) -> Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template(template)?
        .progress_chars("##-"))
}

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let cache_dir = expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let model_path = cache_dir.join("model.onnx");
    let tokenizer_path = cache_dir.join("tokenizer.json");
    let base = format!("{HF_BASE}/{}/resolve/main", config.model);

    if model_path.exists() {
        println!("Model already exists at {}", model_path.display());
    } else {
        println!("Downloading {} model.onnx...", config.model);
        download_file(&format!("{base}/onnx/model.onnx"), &model_path).await?;
        println!("Model saved to {}", model_path.display());
    }

    if tokenizer_path.exists() {
        println!("Tokenizer already exists at {}", tokenizer_path.display());
    } else {
        println!("Downloading tokenizer.json...");
        download_file(&format!("{base}/tokenizer.json"), &tokenizer_path).await?;
        println!("Tokenizer saved to {}", tokenizer_path.display());
    }

    println!("Model download complete.");
    Ok(())
}

/// Stream a URL to `dest` through a temp file, then rename into place.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(bar_style("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")?);
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk).await.context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}

//! CLI `init` and `passwd` commands: create the vault and re-key it.

use anyhow::{Context, Result};

use cairn::config::CairnConfig;
use cairn::db::{self, store};
use cairn::vault;

/// Create the database and a fresh vault.
pub fn init(config: &CairnConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;

    anyhow::ensure!(
        store::load_vault(&conn)?.is_none(),
        "a vault already exists at {}",
        db_path.display()
    );

    let passphrase = super::prompt_new_passphrase("CAIRN_PASSPHRASE")?;
    let params = config.crypto.kdf_params();
    let (record, session) =
        vault::create(&passphrase, &params).context("failed to create vault")?;
    store::save_vault(&conn, &record, &params)?;
    db::migrations::set_embedding_model(&conn, &config.embedding.model)?;
    session.lock();

    println!("Vault created at {}", db_path.display());
    println!("Run `cairn model download` to fetch the embedding model.");
    Ok(())
}

/// Re-wrap the data key under a new passphrase. Entries are not re-encrypted.
pub fn passwd(config: &CairnConfig) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let stored = store::load_vault(&conn)?
        .context("no vault found; run `cairn init` first")?;

    let old = super::prompt_passphrase("Current passphrase")?;
    let new = super::prompt_new_passphrase("CAIRN_NEW_PASSPHRASE")?;
    let params = stored.params_or(config.crypto.kdf_params());

    let record = vault::change_passphrase(&stored.record, &old, &new, &params)
        .context("failed to change passphrase")?;
    store::update_vault(&conn, &record, &params)?;

    println!("Passphrase changed.");
    Ok(())
}

//! Login and logout commands.

use super::{CommandResult, Context};
use amplisync_engine::Session;
use tracing::info;

/// Stores a session for later commands.
pub fn login(context: &Context, url: &str, login: &str, token: &str) -> CommandResult {
    let _lock = context.lock()?;
    let store = context.session_store();
    store.save(&Session::new(login, token, url))?;
    info!(login, path = %store.path().display(), "session saved");
    println!("Logged in as {login}");
    Ok(())
}

/// Deletes the local database files and the stored session.
///
/// Works without a session: the database files are removed either way.
pub fn logout(context: &Context) -> CommandResult {
    let _lock = context.lock()?;
    match context.engine() {
        Ok(engine) => engine.logout(),
        Err(_) => context.location().delete_database_files_best_effort(),
    }
    context.session_store().clear()?;
    println!("Logged out");
    Ok(())
}

use clap::Subcommand;
use console::style;
use harvest_auth::{token_key, CredentialStore, KeyringStore};

#[derive(Subcommand)]
pub enum TokenAction {
    /// Store the access token of a platform entry
    Set {
        /// Platform entry name
        platform: String,
        /// Access token (will prompt if not provided)
        #[arg(long)]
        token: Option<String>,
    },
    /// Remove a stored access token
    Delete {
        /// Platform entry name
        platform: String,
    },
}

pub fn run(action: TokenAction) -> anyhow::Result<()> {
    let store = KeyringStore::new();
    match action {
        TokenAction::Set { platform, token } => {
            let token = match token {
                Some(t) => t,
                None => {
                    eprint!("Enter access token for {platform}: ");
                    let mut input = String::new();
                    std::io::stdin().read_line(&mut input)?;
                    input.trim().to_string()
                }
            };
            set(&store, &platform, &token)?;
            println!("{} Token stored for '{platform}'", style("✓").green());
            Ok(())
        }
        TokenAction::Delete { platform } => {
            store.delete(&token_key(&platform))?;
            println!("Token removed for '{platform}'");
            Ok(())
        }
    }
}

fn set(store: &dyn CredentialStore, platform: &str, token: &str) -> anyhow::Result<()> {
    let token = token.trim();
    if token.is_empty() {
        anyhow::bail!("Token cannot be empty");
    }
    store.store(&token_key(platform), token)?;
    Ok(())
}

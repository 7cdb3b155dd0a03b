mod cache;
mod config;
mod linear;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;

use cache::{CacheConfig, MirrorStore, NoopMirror, ResponseCache, SqliteMirror};
use linear::CachedLinearClient;

#[derive(Parser, Debug)]
#[command(name = "linport")]
#[command(about = "A review and approval portal for Linear-style issue trackers")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/linport/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List teams visible to the portal
  Teams,
  /// Warm the cache for a team and print a review summary
  Warm {
    /// Team id (defaults to the configured default team)
    #[arg(short, long)]
    team: Option<String>,
    /// Also resolve the permission hierarchy for this user id
    #[arg(short, long)]
    user: Option<String>,
  },
  /// Show full details for a work item
  Show { issue: String },
  /// Move a work item to a workflow state (approve, reject, ...)
  Approve { issue: String, state: String },
  /// Archive a work item
  Archive { issue: String },
  /// List portal users
  Users,
  /// Deactivate a portal user
  DeactivateUser { user: String },
  /// List customer organizations
  Customers,
  /// Create a customer organization
  AddCustomer {
    name: String,
    #[arg(long)]
    domain: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  // Composition root: one shared cache for everything downstream.
  let durable: Arc<dyn MirrorStore> = if config.cache.persist {
    Arc::new(SqliteMirror::open()?)
  } else {
    Arc::new(NoopMirror)
  };
  let session: Arc<dyn MirrorStore> = if config.cache.persist {
    Arc::new(SqliteMirror::in_memory()?)
  } else {
    Arc::new(NoopMirror)
  };

  let cache = ResponseCache::new(
    CacheConfig {
      policies: linear::keys::policies(),
      sweep_interval: config.cache.sweep_interval(),
      sweep_grace: config.cache.sweep_grace(),
    },
    durable,
    session,
  );
  let _sweeper = cache.spawn_sweeper();

  let client = CachedLinearClient::new(&config, cache)?;

  match args.command {
    Command::Teams => {
      for team in client.teams().await? {
        println!("{}\t{}\t{}", team.id, team.key, team.name);
      }
    }
    Command::Warm { team, user } => warm(&client, &config, team, user).await?,
    Command::Show { issue } => {
      let item = client.issue(&issue).await?;
      println!("{}  {}", item.identifier, item.title);
      println!("state: {}  assignee: {}", item.state_id, item.assignee.as_deref().unwrap_or("-"));
      if let Some(description) = &item.description {
        println!("\n{}", description);
      }
    }
    Command::Approve { issue, state } => {
      let updated = client.update_issue_state(&issue, &state).await?;
      println!("{} -> {}", updated.identifier, updated.state_id);
    }
    Command::Archive { issue } => {
      client.archive_issue(&issue).await?;
      println!("archived {}", issue);
    }
    Command::Users => {
      for user in client.users().await? {
        let flag = if user.active { "" } else { " (inactive)" };
        println!("{}\t{}{}", user.id, user.email, flag);
      }
    }
    Command::DeactivateUser { user } => {
      let updated = client.update_user_active(&user, false).await?;
      println!("deactivated {}", updated.email);
    }
    Command::Customers => {
      for customer in client.customers().await? {
        println!(
          "{}\t{}\t{}",
          customer.id,
          customer.name,
          customer.domain.as_deref().unwrap_or("-")
        );
      }
    }
    Command::AddCustomer { name, domain } => {
      let created = client.create_customer(&name, domain.as_deref()).await?;
      println!("created customer {}", created.id);
    }
  }

  Ok(())
}

async fn warm(
  client: &CachedLinearClient,
  config: &config::Config,
  team: Option<String>,
  user: Option<String>,
) -> Result<()> {
  let team_id = team
    .or_else(|| config.default_team.clone())
    .ok_or_else(|| eyre!("No team specified; pass --team or set default_team"))?;

  let details = client.team_details(&team_id).await?;
  let members = client.team_members(&team_id).await?;
  let states = client.workflow_states(&team_id).await?;
  let issues = client.team_issues(&team_id, None).await?;

  println!(
    "{} ({}): {} members, {} workflow states, {} work items",
    details.name,
    details.key,
    members.len(),
    states.len(),
    issues.len()
  );

  if let Some(user_id) = user {
    let perms = client.permissions(&user_id).await?;
    println!("{} permission grants resolved for {}", perms.grants.len(), user_id);
  }

  let stats = client.cache().stats();
  println!(
    "cache: {} entries, {} hits / {} stale / {} misses ({:.0}% hit rate)",
    stats.size,
    stats.hits,
    stats.stale_hits,
    stats.misses,
    stats.hit_rate() * 100.0
  );

  Ok(())
}

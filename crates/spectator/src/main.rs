//! Live board spectator: terminal client.

use std::ops::ControlFlow;

use clap::Parser;
use spectator::api::LiveApi;
use spectator::cli;
use spectator::connection::{ConnectionManager, ConnectionState};
use spectator::controller::LiveController;
use spectator::session::SessionToken;
use spectator::view;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let api = LiveApi::new(&cli.hub_url);
    let session_path = SessionToken::default_path(cli.session_file.as_deref())?;
    let session = SessionToken::load_or_create(&session_path)?;

    match cli.command.unwrap_or(cli::Commands::Watch {
        channel: shared::channels::LIVE.to_string(),
    }) {
        cli::Commands::Watch { channel } => {
            if !shared::channels::is_known(&channel) {
                anyhow::bail!(
                    "unknown channel {} (expected one of {})",
                    channel,
                    shared::channels::ALL.join(", ")
                );
            }
            let (connection, inbound) =
                ConnectionManager::new(api.ws_url(&channel), cli.connection.options());
            let mut controller = LiveController::new(api, session, connection, inbound);
            let mut last_state = None;
            controller
                .run(|view, state| {
                    if last_state != Some(state) {
                        if state != ConnectionState::Connected {
                            eprintln!("connection: {:?}", state);
                        }
                        last_state = Some(state);
                    }
                    print!("\x1b[2J\x1b[H{}", view::render(view));
                    ControlFlow::Continue(())
                })
                .await?;
        }
        cli::Commands::Vote { option_id } => {
            let res = api.vote(&option_id, session.as_str()).await?;
            if !res.success {
                anyhow::bail!("Vote rejected: {}", res.message);
            }
            match res.new_vote_count {
                Some(count) => println!("{} ({} votes)", res.message, count),
                None => println!("{}", res.message),
            }
        }
        cli::Commands::Like { project_id } => {
            let res = api.like(&project_id, session.as_str()).await?;
            println!("{} ({} likes)", res.message, res.new_like_count);
        }
        cli::Commands::Score {
            player_name,
            score,
            game,
        } => {
            let res = api
                .submit_score(&player_name, score, &game, session.as_str())
                .await?;
            println!("Score saved, rank {}", res.rank);
        }
        cli::Commands::Ranking { game, limit } => {
            let board = api.ranking(&game, limit).await?;
            for (i, entry) in board.ranking.iter().enumerate() {
                println!("{:>2}. {:>6}  {}", i + 1, entry.score, entry.player_name);
            }
        }
        cli::Commands::Gallery { limit, offset } => {
            let gallery = api.projects(limit, offset).await?;
            for project in &gallery.projects {
                println!(
                    "{}  {:>4} likes  {}  [{}]",
                    project.id,
                    project.like_count,
                    project.title,
                    project.category.as_deref().unwrap_or("-")
                );
            }
            println!("{} of {} projects", gallery.projects.len(), gallery.total);
        }
    }

    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use studyroom_client::panel::{
    RoomHistoryResource, SkillsResource, StatsResource, SummaryResource,
};
use studyroom_client::{
    ChatLine, ChatPanel, ChatView, CreateOutcome, HistoryPanel, JoinOutcome, LoadOutcome,
    SendOutcome, SessionReport, SkillsPanel, StatsPanel, SummaryPanel, UserHistory,
};
use studyroom_api::HistoryApi;
use studyroom_types::{
    HistoryEntry, Profile, RoomCode, SessionStats, SessionSummary, SkillSignal,
};

use crate::app::App;

/// How often the chat view is re-rendered while tailing a room.
const RENDER_INTERVAL: Duration = Duration::from_millis(250);

fn room_code(input: &str) -> anyhow::Result<RoomCode> {
    RoomCode::parse(input).with_context(|| format!("invalid room code {input:?}"))
}

pub async fn signup(app: &App, email: &str, password: &str) -> anyhow::Result<()> {
    match app.session.sign_up(email, password).await? {
        Some(identity) => println!("Signed up and signed in as {}", identity.id),
        None => println!("Check {email} for a confirmation link, then sign in."),
    }
    Ok(())
}

pub fn login_url(app: &App, provider: &str, redirect: Option<&str>) -> anyhow::Result<()> {
    println!("{}", app.session.sign_in_with_provider(provider, redirect)?);
    Ok(())
}

pub async fn join(app: &App, input: &str) -> anyhow::Result<()> {
    let code = enter_room(app, input).await?;
    println!("Room {code} is open at {}", app.routes.current());
    Ok(())
}

async fn enter_room(app: &App, input: &str) -> anyhow::Result<RoomCode> {
    match app.controller().join(input).await {
        JoinOutcome::Joined(code) => Ok(code),
        JoinOutcome::Ignored => bail!("enter a room code"),
        JoinOutcome::NotFound(message) | JoinOutcome::Failed(message) => bail!(message),
    }
}

pub async fn create(app: &App) -> anyhow::Result<()> {
    match app.controller().create().await {
        CreateOutcome::Created(code) => {
            println!("Created room {code}");
            Ok(())
        }
        CreateOutcome::SignInRequired => bail!("sign in first with --email and --password"),
        CreateOutcome::Failed(message) => bail!(message),
    }
}

pub async fn chat(app: &App, input: &str) -> anyhow::Result<()> {
    let code = enter_room(app, input).await?;
    let controller = app.controller();
    let panel = ChatPanel::new(app.gateway.clone(), app.realtime().await, app.session.clone());

    if panel.mount(code.clone()).await == LoadOutcome::Failed {
        eprintln!("Could not load earlier messages.");
    }
    if app.session.identity().is_none() {
        eprintln!("Read-only: sign in with --email and --password to send.");
    }
    let mut printed = render_chat(&panel, None);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut render = tokio::time::interval(RENDER_INTERVAL);
    loop {
        tokio::select! {
            _ = render.tick() => {
                printed = render_chat(&panel, Some(printed));
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/clear" => {
                        println!("Clear this session's history? [y/N]");
                        let answer = lines.next_line().await?.unwrap_or_default();
                        if !confirmed(&answer) {
                            println!("-- kept --");
                            continue;
                        }
                        match panel.clear().await {
                            Ok(()) => {
                                println!("-- chat cleared --");
                                printed = 0;
                            }
                            Err(e) => eprintln!("Failed to clear chat: {e}"),
                        }
                    }
                    "/end" => match controller.end_session(&code).await {
                        Ok(()) => {
                            panel.unmount();
                            info!("Now at {}", app.routes.current());
                            return print_report(app, &code).await;
                        }
                        Err(e) => eprintln!("{}", e.alert()),
                    },
                    _ => {
                        panel.set_input(line.as_str());
                        match panel.send().await {
                            SendOutcome::Failed => eprintln!("Message not sent; try again."),
                            SendOutcome::Ignored if app.session.identity().is_none() => {
                                eprintln!("Sign in to send messages.");
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
    }

    panel.unmount();
    Ok(())
}

fn confirmed(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Print lines added since `printed`; `None` for the first render.
fn render_chat(panel: &ChatPanel, printed: Option<usize>) -> usize {
    let lines = match panel.view() {
        ChatView::Empty => {
            if printed.is_none() {
                println!("No messages yet. Say hello!");
            }
            return 0;
        }
        ChatView::Messages(lines) => lines,
    };
    let mut printed = printed.unwrap_or(0);
    if printed > lines.len() {
        printed = 0;
    }
    for line in &lines[printed..] {
        println!("{}", format_line(line));
    }
    lines.len()
}

fn format_line(line: &ChatLine) -> String {
    let who = if line.assistant {
        "assistant"
    } else if line.mine {
        "you"
    } else {
        "peer"
    };
    match line.message.created_at {
        Some(at) => format!("{} [{}] {}", at.format("%H:%M"), who, line.message.content),
        None => format!("[{}] {}", who, line.message.content),
    }
}

pub async fn end(app: &App, input: &str) -> anyhow::Result<()> {
    let code = room_code(input)?;
    if let Err(e) = app.controller().end_session(&code).await {
        bail!("{} ({e})", e.alert());
    }
    print_report(app, &code).await
}

pub async fn archive(app: &App, input: &str) -> anyhow::Result<()> {
    let code = room_code(input)?;
    let response = app.gateway.end_session(&code).await?;
    println!(
        "Session {code}: {} (archived: {})",
        response.status.as_deref().unwrap_or("done"),
        response.archived
    );
    Ok(())
}

pub async fn summary(app: &App, input: &str) -> anyhow::Result<()> {
    let panel = SummaryPanel::new(SummaryResource(app.gateway.clone()));
    if panel.mount(room_code(input)?).await == LoadOutcome::Failed {
        bail!("could not load the summary");
    }
    print_summary(&panel.snapshot());
    Ok(())
}

pub async fn stats(app: &App, input: &str) -> anyhow::Result<()> {
    let panel = StatsPanel::new(StatsResource(app.gateway.clone()));
    if panel.mount(room_code(input)?).await == LoadOutcome::Failed {
        bail!("could not load session stats");
    }
    println!("{}", format_stats(&panel.snapshot()));
    Ok(())
}

pub async fn skills(app: &App, input: &str) -> anyhow::Result<()> {
    let panel = SkillsPanel::new(SkillsResource(app.gateway.clone()));
    if panel.mount(room_code(input)?).await == LoadOutcome::Failed {
        bail!("could not load skill signals");
    }
    let signals = panel.snapshot();
    if signals.is_empty() {
        println!("No skill signals yet.");
    }
    for signal in &signals {
        println!("{}", format_signal(signal));
    }
    Ok(())
}

pub async fn report(app: &App, input: &str) -> anyhow::Result<()> {
    print_report(app, &room_code(input)?).await
}

async fn print_report(app: &App, code: &RoomCode) -> anyhow::Result<()> {
    let report = SessionReport::load(app.gateway.as_ref(), app.gateway.as_ref(), code).await;

    println!("Session {code}");
    println!("  {}", format_stats(&report.stats));
    if !report.signals.is_empty() {
        println!("Skills");
        for signal in &report.signals {
            println!("  {}", format_signal(signal));
        }
    }
    print_summary(&report.summary);
    if !report.engagement.is_null() {
        println!("Engagement");
        println!("{}", serde_json::to_string_pretty(&report.engagement)?);
    }
    Ok(())
}

fn format_stats(stats: &SessionStats) -> String {
    format!(
        "{} messages ({} yours), {} insights, {} min",
        stats.message_count, stats.user_message_count, stats.insight_count, stats.duration_mins
    )
}

fn format_signal(signal: &SkillSignal) -> String {
    let meter: String = signal
        .level
        .indicators()
        .iter()
        .map(|lit| if *lit { '#' } else { '-' })
        .collect();
    format!("{meter} {}", signal.name)
}

fn print_summary(summary: &SessionSummary) {
    if summary.is_empty() {
        println!("No summary yet.");
        return;
    }
    if let Some(text) = &summary.summary_text {
        println!("{text}");
    }
    for point in &summary.key_points {
        println!("  * {point}");
    }
    if !summary.suggested_topics.is_empty() {
        println!("Next: {}", summary.suggested_topics.join(", "));
    }
}

pub async fn history(app: &App, input: Option<&str>) -> anyhow::Result<()> {
    let entries = match input {
        Some(input) => {
            let panel = HistoryPanel::new(RoomHistoryResource(app.gateway.clone()));
            panel.mount(room_code(input)?).await;
            panel.snapshot()
        }
        None => {
            app.require_identity()?;
            UserHistory::load(app.gateway.as_ref(), &app.session).await
        }
    };

    if entries.is_empty() {
        println!("No past sessions.");
    }
    for entry in &entries {
        println!("{}", format_entry(entry));
        if let Some(text) = entry.summary_text() {
            println!("    {text}");
        }
    }
    Ok(())
}

fn format_entry(entry: &HistoryEntry) -> String {
    let date = entry
        .created_at
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "----------".into());
    let duration = entry
        .duration_mins()
        .map(|mins| format!("{mins} min"))
        .unwrap_or_else(|| "-".into());
    format!(
        "{date}  {}  ({duration}, {} key concepts)",
        entry.topic(),
        entry.key_concept_count()
    )
}

pub async fn quiz(app: &App, input: &str) -> anyhow::Result<()> {
    let quiz = app.gateway.generate_quiz(&room_code(input)?).await?;
    println!("{}", serde_json::to_string_pretty(&quiz)?);
    Ok(())
}

pub async fn profile(
    app: &App,
    name: Option<&str>,
    avatar: Option<PathBuf>,
    select: Option<&str>,
) -> anyhow::Result<()> {
    app.require_identity()?;
    let editor = app.profile_editor()?;

    if let Some(name) = name {
        editor.rename(name).await?;
    }
    if let Some(path) = avatar {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        editor.upload_avatar(bytes, file_name).await?;
    }
    if let Some(url) = select {
        editor.select_avatar(url).await?;
    }

    match app.session.profile() {
        Some(profile) => print_profile(&profile),
        None => println!("No profile yet."),
    }
    Ok(())
}

fn print_profile(profile: &Profile) {
    println!("{}", profile.display_name.as_deref().unwrap_or("(no name)"));
    if let Some(url) = &profile.avatar_url {
        println!("Avatar: {url}");
    }
    for (i, url) in profile.avatars.iter().enumerate() {
        println!("  {}. {url}", i + 1);
    }
}

//! Web Agent - autonomous web navigation
//!
//! This is the CLI entry point for the web-agent tool.
//! Run with: cargo run --bin web-agent [-- <goal>]

use std::env;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use web_agent::agent::{AgentState, FailureReason, Notice, SessionMode};
use web_agent::config::{get_messages, Messages};
use web_agent::{
    AgentHandle, AppSettings, ChromeSurface, JsonFileStore, KeyValueStore, KnowledgeBase,
    MemoryStore, PerceptionMode, Planner, PlannerConfig, WebAgent,
};

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Environment variables take precedence over the settings file.
fn apply_env(settings: &mut AppSettings) {
    if let Some(v) = env_parse("MODEL_PROVIDER") {
        settings.provider = v;
    }
    if let Ok(v) = env::var("MODEL_BASE_URL") {
        settings.base_url = v;
    }
    if let Ok(v) = env::var("MODEL_API_KEY") {
        settings.api_key = v;
    }
    if let Ok(v) = env::var("MODEL_NAME") {
        settings.model_name = v;
    }
    if let Some(v) = env_parse("MODEL_MAX_RETRIES") {
        settings.max_retries = v;
    }
    if let Ok(v) = env::var("AGENT_LANG") {
        settings.lang = v;
    }
    if let Some(v) = env_parse("AGENT_MODE") {
        settings.mode = v;
    }
    if let Some(v) = env_parse("PERCEPTION_MODE") {
        settings.perception = v;
    }
    if let Ok(v) = env::var("HOME_URL") {
        settings.home_url = v;
    }
    if let Some(v) = env_parse("MAX_STEPS") {
        settings.max_steps = v;
    }
    if let Some(v) = env_parse("MAX_NOT_FOUND_RETRIES") {
        settings.max_not_found_retries = v;
    }
    if let Some(v) = env_flag("SUBMIT_ON_TYPE") {
        settings.submit_on_type = v;
    }
    if let Some(v) = env_flag("REACTIVE_MODE") {
        settings.reactive = v;
    }
    if let Some(v) = env_flag("HEADLESS") {
        settings.headless = v;
    }
    if let Ok(v) = env::var("KNOWLEDGE_DIR") {
        settings.knowledge_dir = v;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut settings = AppSettings::load();
    apply_env(&mut settings);
    let msgs = get_messages(&settings.lang);

    let store: Arc<dyn KeyValueStore> = match settings.knowledge_path() {
        Some(dir) => Arc::new(JsonFileStore::new(dir)),
        None => {
            warn!("No data directory available, knowledge will not persist");
            Arc::new(MemoryStore::new())
        }
    };
    let knowledge = match KnowledgeBase::load(store.clone()).await {
        Ok(knowledge) => knowledge,
        Err(e) => {
            warn!("Failed to load knowledge, starting empty: {}", e);
            KnowledgeBase::empty(store)
        }
    };

    let planner =
        Planner::from_config(PlannerConfig::default().with_model_config(settings.model_config()));

    println!("🌐 Web Agent - autonomous web navigation");
    println!("================================================");
    println!(
        "Model: {} @ {} ({})",
        settings.model_name, settings.base_url, settings.provider
    );
    println!("Language: {}", settings.lang);
    println!("Mode: {} / {}", settings.mode, settings.perception);
    println!("Home: {}", settings.home_url);
    println!("================================================\n");

    let (surface, page_events) = ChromeSurface::launch(settings.chrome_options()).await?;
    let (agent, mut notices) = WebAgent::new(
        settings.agent_config(),
        surface,
        page_events,
        planner,
        knowledge,
    );
    let handle = agent.spawn();
    handle.open(&settings.home_url).await?;

    let args: Vec<String> = env::args().skip(1).collect();
    if !args.is_empty() {
        let goal = args.join(" ");
        println!("📝 {}: {}\n", msgs.task, goal);
        handle.submit(goal).await?;
    }

    println!("Type a goal and press Enter. Commands:");
    println!("  /auto, /guide, /vision, /structural, /stop, /skills,");
    println!("  /play <goal>, /forget <goal>, /go <url>, quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut choosing_replay = false;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if input == "quit" || input == "exit" {
                    println!("Goodbye! 👋");
                    break;
                }
                if choosing_replay {
                    let answer = input.to_lowercase();
                    if answer == "y" || answer == "n" {
                        choosing_replay = false;
                        handle.choose_replay(answer == "y").await?;
                        continue;
                    }
                }
                if let Err(e) = run_command(&handle, input, msgs).await {
                    eprintln!("❌ {}", e);
                }
            }

            notice = notices.recv() => {
                let Some(notice) = notice else { break };
                if matches!(notice, Notice::ReplayOffered { .. }) {
                    choosing_replay = true;
                }
                if let Some(text) = render(&notice, msgs) {
                    println!("{}", text);
                    std::io::stdout().flush()?;
                }
            }
        }
    }

    let _ = handle.shutdown().await;
    Ok(())
}

async fn run_command(handle: &AgentHandle, input: &str, msgs: &Messages) -> anyhow::Result<()> {
    let (command, rest) = match input.split_once(' ') {
        Some((command, rest)) => (command, rest.trim()),
        None => (input, ""),
    };

    match command {
        "/auto" => {
            handle.set_mode(SessionMode::Auto).await?;
            println!("🤖 {}", msgs.auto);
        }
        "/guide" => {
            handle.set_mode(SessionMode::Guide).await?;
            println!("🧭 {}", msgs.guide);
        }
        "/vision" => handle.set_perception(PerceptionMode::Vision).await?,
        "/structural" => handle.set_perception(PerceptionMode::Structural).await?,
        "/stop" => handle.stop().await?,
        "/skills" => {
            let skills = handle.skills().await?;
            if skills.is_empty() {
                println!("{}", msgs.no_skills);
            }
            for skill in skills {
                println!("  • {}", skill);
            }
        }
        "/play" => handle.play_skill(rest).await?,
        "/forget" => {
            if !handle.forget_skill(rest).await? {
                println!("{}: {}", msgs.unknown_skill, rest);
            }
        }
        "/go" => handle.open(rest).await?,
        _ => handle.submit(input).await?,
    }
    Ok(())
}

fn render(notice: &Notice, msgs: &Messages) -> Option<String> {
    let text = match notice {
        Notice::State(AgentState::Analyzing) => format!("🤔 {}...", msgs.thinking),
        Notice::State(_) | Notice::Loading(_) | Notice::Navigation(_) | Notice::GuideCleared => {
            return None
        }
        Notice::Busy => format!("⏳ {}", msgs.busy),
        Notice::ReplayOffered { goal, steps } => format!(
            "📚 {} ({}, {} steps). {}",
            msgs.skill_known, goal, steps, msgs.replay_prompt
        ),
        Notice::Action { step, plan } => format!("⚙️ {} #{}: {}", msgs.working, step, plan),
        Notice::ReplayStep { index, plan } => format!("▶️ #{}: {}", index + 1, plan),
        Notice::GuidePrompt(message) => format!("👉 {}", message),
        Notice::StepAborted(reason) => format!("⚠️ {}: {}", msgs.step_aborted, reason),
        Notice::Finished { message, steps, .. } => format!(
            "✅ {} ({} steps){}",
            msgs.goal_reached,
            steps,
            message
                .as_deref()
                .map(|m| format!("\n📋 {}: {}", msgs.result, m))
                .unwrap_or_default()
        ),
        Notice::ReplayFinished { steps, .. } => {
            format!("✅ {} ({} steps)", msgs.macro_finished, steps)
        }
        Notice::Stopped => format!("⏹️ {}", msgs.stopped),
        Notice::Failed(reason) => {
            let reason = match reason {
                FailureReason::Planner(e) => e.clone(),
                FailureReason::NotFoundLimit(n) => format!("element not found {} times", n),
                FailureReason::PerceptionLimit(n) => format!("page could not be read {} times", n),
                FailureReason::StepLimit(n) => format!("step limit of {} reached", n),
            };
            format!("❌ {}: {}", msgs.session_failed, reason)
        }
        Notice::SkillSaved(goal) => format!("💾 {}: {}", msgs.skill_learned, goal),
        Notice::UnknownSkill(goal) => format!("❓ {}: {}", msgs.unknown_skill, goal),
        Notice::KnowledgeUnavailable(e) => format!("⚠️ {}", e),
        Notice::VoiceError(e) => format!("🎤 {}: {}", msgs.voice_error, e),
    };
    Some(text)
}

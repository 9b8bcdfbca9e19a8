//! Command implementations for the muster CLI.
//!
//! Thin layer over the library: each handler bootstraps the runtime,
//! calls the caller API (`submit_task`, `list_agents`, `get_agent`,
//! `registry_stats`, `force_rediscover`), and prints results. The command
//! layer uses anyhow for context-rich errors; the core's typed errors are
//! preserved for exit-code mapping.

use crate::cli::{AgentsArgs, Command, DiscoverArgs, SearchArgs, ShowArgs, SubmitArgs};
use crate::config::CoreConfig;
use crate::context::CoreContext;
use crate::definition::{AgentDefinition, AgentKind};
use crate::runtime::Runtime;
use crate::task::{TaskRequest, TaskStatus};
use anyhow::{Context, bail};

/// Sample definition written by `muster init`.
const SAMPLE_AGENT: &str = r#"name: echo-agent
kind: ops
description: >
  Sample agent that echoes its briefing path. Replace the command with a
  real executable to dispatch actual work.
capabilities:
  - demo
command: "cat {briefing_file}"
"#;

/// Dispatch a command to its implementation.
pub fn dispatch(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Init => cmd_init(),
        Command::Agents(args) => cmd_agents(args),
        Command::Show(args) => cmd_show(args),
        Command::Search(args) => cmd_search(args),
        Command::Stats => cmd_stats(),
        Command::Discover(args) => cmd_discover(args),
        Command::Submit(args) => cmd_submit(args),
        Command::Watch => cmd_watch(),
        Command::Prune => cmd_prune(),
    }
}

fn bootstrap() -> anyhow::Result<Runtime> {
    let context = CoreContext::resolve()?;
    Ok(Runtime::bootstrap(context)?)
}

fn cmd_init() -> anyhow::Result<()> {
    let context = CoreContext::resolve()?;

    if context.agents_dir.exists() {
        println!("muster already initialized at {}", context.state_dir.display());
        return Ok(());
    }

    std::fs::create_dir_all(&context.agents_dir).with_context(|| {
        format!(
            "failed to create agents directory '{}'",
            context.agents_dir.display()
        )
    })?;
    std::fs::write(context.agents_dir.join("echo-agent.yaml"), SAMPLE_AGENT)
        .context("failed to write sample agent definition")?;

    let config_path = context.config_path();
    if !config_path.exists() {
        let config = serde_yaml::to_string(&CoreConfig::default())
            .context("failed to serialize default config")?;
        std::fs::write(&config_path, config)
            .with_context(|| format!("failed to write '{}'", config_path.display()))?;
    }

    println!("Initialized muster in {}", context.state_dir.display());
    println!("  agents:  {}", context.agents_dir.display());
    println!("  config:  {}", config_path.display());
    Ok(())
}

fn describe(def: &AgentDefinition, low_confidence_floor: u8) -> String {
    let mut flags = Vec::new();
    if def.is_hybrid() {
        flags.push("hybrid");
    }
    if def.is_low_confidence(low_confidence_floor) {
        flags.push("low_confidence");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };

    format!(
        "{:<24} {:<16} {:<8} score {:>3}{}",
        def.name,
        def.kind.as_str(),
        def.tier.as_str(),
        def.validation_score,
        flags
    )
}

fn cmd_agents(args: AgentsArgs) -> anyhow::Result<()> {
    let runtime = bootstrap()?;
    let registry = &runtime.registry;

    let mut agents = match &args.kind {
        Some(kind_str) => {
            let kind = AgentKind::parse(kind_str)
                .with_context(|| format!("unknown agent kind '{}'", kind_str))?;
            registry.list_by_kind(kind)
        }
        None => registry.list_all(),
    };
    if let Some(tag) = &args.specialization {
        let tag = tag.to_lowercase();
        agents.retain(|d| d.specializations.iter().any(|s| s.to_lowercase() == tag));
    }
    if args.hybrid {
        agents.retain(|d| d.is_hybrid());
    }

    if args.json {
        let refs: Vec<&AgentDefinition> = agents.iter().map(|d| d.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&refs)?);
        return Ok(());
    }

    let floor = runtime.config.min_validation_score;
    for def in &agents {
        println!("{}", describe(def, floor));
    }
    println!("\n{} agent(s)", agents.len());

    if args.shadowed {
        let shadowed = registry.shadowed();
        if !shadowed.is_empty() {
            println!("\nShadowed definitions:");
            for def in &shadowed {
                println!("  {} ({} tier, {})", def.name, def.tier, def.source_path.display());
            }
        }
    }
    Ok(())
}

fn cmd_show(args: ShowArgs) -> anyhow::Result<()> {
    let runtime = bootstrap()?;
    let def = runtime.registry.get_agent(&args.name)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(def.as_ref())?);
        return Ok(());
    }

    println!("name:            {}", def.name);
    println!("kind:            {}", def.kind);
    if def.is_hybrid() {
        let kinds: Vec<&str> = def.hybrid_kinds.iter().map(|k| k.as_str()).collect();
        println!("hybrid kinds:    {}", kinds.join(", "));
    }
    println!("tier:            {}", def.tier);
    println!("complexity:      {}", def.complexity.as_str());
    println!("score:           {}", def.validation_score);
    if !def.specializations.is_empty() {
        println!("specializations: {}", def.specializations.join(", "));
    }
    if !def.frameworks.is_empty() {
        println!("frameworks:      {}", def.frameworks.join(", "));
    }
    if !def.domains.is_empty() {
        println!("domains:         {}", def.domains.join(", "));
    }
    if !def.capabilities.is_empty() {
        println!("capabilities:    {}", def.capabilities.join(", "));
    }
    if let Some(command) = &def.command {
        println!("command:         {}", command);
    }
    println!("source:          {}", def.source_path.display());
    if !def.description.is_empty() {
        println!("\n{}", def.description);
    }
    Ok(())
}

fn cmd_search(args: SearchArgs) -> anyhow::Result<()> {
    let runtime = bootstrap()?;
    let matches = runtime.registry.search_by_capability(&args.query);

    if matches.is_empty() {
        println!("no agents match '{}'", args.query);
        return Ok(());
    }

    let floor = runtime.config.min_validation_score;
    for m in &matches {
        println!("{}", describe(&m.definition, floor));
    }
    Ok(())
}

fn cmd_stats() -> anyhow::Result<()> {
    let runtime = bootstrap()?;
    let stats = runtime.registry.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn cmd_discover(args: DiscoverArgs) -> anyhow::Result<()> {
    let runtime = bootstrap()?;
    let agents = runtime.registry.discover_all(args.force)?;
    let stats = runtime.registry.stats();

    println!(
        "discovered {} agent(s), {} shadowed, {} conflict(s)",
        agents.len(),
        stats.shadowed_count,
        stats.conflict_count
    );
    for conflict in runtime.registry.conflicts() {
        println!(
            "  conflict: '{}' at {} tier, ignored {}",
            conflict.name,
            conflict.tier,
            conflict.ignored.display()
        );
    }
    Ok(())
}

fn cmd_submit(args: SubmitArgs) -> anyhow::Result<()> {
    let runtime = bootstrap()?;

    let request = TaskRequest {
        description: args.description,
        agent: args.agent,
        capability: args.capability,
        requirements: args.requirements,
        deliverables: args.deliverables,
        timeout_seconds: args.timeout,
        ..TaskRequest::default()
    };

    let execution = runtime.orchestrator.submit(request)?;
    let agent_name = execution
        .agent
        .as_ref()
        .map(|a| a.name.clone())
        .unwrap_or_else(|| "(unresolved)".to_string());

    println!("task:   {}", execution.id);
    println!("agent:  {}", agent_name);
    println!("status: {:?}", execution.status);
    if let Some(result) = &execution.result {
        println!("stdout: {}", result.stdout_path.display());
        println!("stderr: {}", result.stderr_path.display());
    }

    match execution.status {
        TaskStatus::Succeeded => Ok(()),
        _ => {
            let reason = execution.failure.unwrap_or_else(|| "unknown".to_string());
            bail!("task {} did not succeed: {}", execution.id, reason)
        }
    }
}

fn cmd_watch() -> anyhow::Result<()> {
    let mut runtime = bootstrap()?;
    runtime.start_watcher()?;
    println!("watching agent directories (ctrl-c to stop)");

    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

fn cmd_prune() -> anyhow::Result<()> {
    let runtime = bootstrap()?;
    let pruned = runtime.isolation.prune_orphans()?;
    println!("pruned {} orphaned isolation(s)", pruned);
    Ok(())
}

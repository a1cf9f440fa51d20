mod display;
mod graph;
mod manifest;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;

use carina_core::differ::create_plan;
use carina_core::effect::Effect;
use carina_core::interpreter::{EffectOutcome, Interpreter};
use carina_core::provider::Provider;
use carina_core::resource::{Resource, ResourceId, State, Value};
use carina_core::schema::ResourceSchema;
use carina_provider_huaweicloud::{HuaweiCloudProvider, ProviderConfig};
use carina_state::{ResourceState, StateBackend, StateFile, create_backend};

use display::{format_effect, print_plan, print_schema, print_schema_list};
use graph::{Bindings, bind, resolve_resource, resource_dependencies, sort_resources_by_dependencies, topological_order};
use manifest::Manifest;

const DEFAULT_MANIFEST: &str = "carina.json";

#[derive(Parser)]
#[command(name = "carina")]
#[command(about = "A functional infrastructure management tool for HuaweiCloud", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the manifest against resource schemas
    Validate {
        /// Path to the JSON manifest
        #[arg(default_value = DEFAULT_MANIFEST)]
        file: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        /// Path to the JSON manifest
        #[arg(default_value = DEFAULT_MANIFEST)]
        file: PathBuf,
    },
    /// Apply changes to reach the desired state
    Apply {
        /// Path to the JSON manifest
        #[arg(default_value = DEFAULT_MANIFEST)]
        file: PathBuf,
    },
    /// Destroy all resources recorded in state
    Destroy {
        /// Path to the JSON manifest
        #[arg(default_value = DEFAULT_MANIFEST)]
        file: PathBuf,

        /// Skip confirmation prompt (auto-approve)
        #[arg(long)]
        auto_approve: bool,
    },
    /// Inspect or edit the state file
    State {
        /// Path to the JSON manifest (for its backend block)
        #[arg(long, short, default_value = DEFAULT_MANIFEST)]
        file: PathBuf,

        #[command(subcommand)]
        command: StateCommands,
    },
    /// Print resource schemas
    Schema {
        /// Resource or data source type; lists all types when omitted
        resource_type: Option<String>,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// List tracked resources
    List,
    /// Show one tracked resource (`type.name`)
    Show { address: String },
    /// Stop tracking a resource without deleting it (`type.name`)
    Rm { address: String },
    /// Remove a lock left behind by an interrupted run
    Unlock { lock_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Validate { file } => run_validate(&file),
        Commands::Plan { file } => run_plan(&file).await,
        Commands::Apply { file } => run_apply(&file).await,
        Commands::Destroy { file, auto_approve } => run_destroy(&file, auto_approve).await,
        Commands::State { file, command } => run_state_command(&file, command).await,
        Commands::Schema { resource_type } => run_schema(resource_type.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn get_schemas() -> HashMap<String, ResourceSchema> {
    carina_provider_huaweicloud::resources::resource_types()
        .into_iter()
        .map(|t| (t.name().to_string(), t.schema()))
        .collect()
}

/// Fill in defaults, check every resource against its schema and order
/// resources by their references
fn prepare_resources(
    manifest: &Manifest,
    schemas: &HashMap<String, ResourceSchema>,
) -> Result<Vec<Resource>, String> {
    let mut resources = manifest.all_resources();
    let mut all_errors = Vec::new();

    for resource in &mut resources {
        let Some(schema) = schemas.get(&resource.id.resource_type) else {
            all_errors.push(format!("{}: unknown resource type", resource.id));
            continue;
        };
        if schema.data_source != resource.is_data_source() {
            let expected = if schema.data_source { "data" } else { "resources" };
            all_errors.push(format!("{}: must be declared under \"{}\"", resource.id, expected));
            continue;
        }
        schema.apply_defaults(resource);
        if let Err(errors) = schema.validate(&resource.attributes) {
            for error in errors {
                all_errors.push(format!("{}: {}", resource.id, error));
            }
        }
    }

    if !all_errors.is_empty() {
        return Err(all_errors.join("\n"));
    }
    sort_resources_by_dependencies(resources)
}

fn build_provider(manifest: &Manifest) -> Result<HuaweiCloudProvider, String> {
    let config = ProviderConfig::from_json(manifest.provider.clone())
        .map_err(|e| format!("Invalid provider configuration: {}", e))?;
    HuaweiCloudProvider::new(config).map_err(|e| e.to_string())
}

// =============================================================================
// Workspace: manifest + state backend
// =============================================================================

struct Workspace {
    manifest: Manifest,
    backend: Box<dyn StateBackend>,
    state: StateFile,
}

impl Workspace {
    async fn load(file: &Path) -> Result<Self, String> {
        let manifest = Manifest::load(file)?;
        let backend = create_backend(&manifest.backend).map_err(|e| e.to_string())?;
        let state = backend
            .read_state()
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?
            .unwrap_or_default();
        Ok(Self {
            manifest,
            backend,
            state,
        })
    }

    async fn reload(&mut self) -> Result<(), String> {
        if let Some(state) = self
            .backend
            .read_state()
            .await
            .map_err(|e| format!("Failed to read state: {}", e))?
        {
            self.state = state;
        }
        Ok(())
    }

    /// Bump the serial and persist
    async fn save(&mut self) -> Result<(), String> {
        self.state.increment_serial();
        self.backend
            .write_state(&self.state)
            .await
            .map_err(|e| format!("Failed to write state: {}", e))
    }

    /// Run `f` while holding the state lock
    async fn locked<T>(
        &mut self,
        operation: &str,
        f: impl AsyncFnOnce(&mut Self) -> Result<T, String>,
    ) -> Result<T, String> {
        let lock = self
            .backend
            .acquire_lock(operation)
            .await
            .map_err(|e| e.to_string())?;
        log::debug!("Acquired state lock {} for {}", lock.id, operation);

        // Another run may have written between loading and locking
        let result = match self.reload().await {
            Ok(()) => f(&mut *self).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.backend.release_lock(&lock).await {
            if result.is_ok() {
                return Err(format!("Failed to release state lock: {}", e));
            }
            log::warn!("Failed to release state lock {}: {}", lock.id, e);
        }
        result
    }
}

// =============================================================================
// Refresh
// =============================================================================

/// Desired resources with references resolved as far as current state allows
struct Refreshed {
    resources: Vec<Resource>,
    current_states: HashMap<ResourceId, State>,
    bindings: Bindings,
    /// Data sources already read during refresh
    read: HashSet<ResourceId>,
}

/// Read the cloud-side state of a tracked resource, keeping values the API
/// does not report back
async fn read_current(provider: &impl Provider, prior: &State) -> Result<State, String> {
    if !prior.exists {
        return Ok(prior.clone());
    }
    let mut current = provider
        .read(&prior.id, prior.identifier.as_deref())
        .await
        .map_err(|e| format!("Failed to read {}: {}", prior.id, e))?;
    if current.exists {
        current.merge_missing(prior);
        if current.identifier.is_none() {
            current.identifier = prior.identifier.clone();
        }
    } else {
        log::info!("{} no longer exists", prior.id);
    }
    Ok(current)
}

async fn refresh(
    provider: &impl Provider,
    desired: &[Resource],
    state: &StateFile,
) -> Result<Refreshed, String> {
    let mut refreshed = Refreshed {
        resources: Vec::with_capacity(desired.len()),
        current_states: HashMap::new(),
        bindings: Bindings::new(),
        read: HashSet::new(),
    };

    for resource in desired {
        let resource = resolve_resource(resource, &refreshed.bindings);

        if resource.is_data_source() {
            if resource.attributes.values().any(Value::contains_unresolved_ref) {
                bind(&mut refreshed.bindings, &resource, None);
            } else {
                let state = provider
                    .read_data_source(&resource)
                    .await
                    .map_err(|e| format!("Failed to read {}: {}", resource.id, e))?;
                bind(&mut refreshed.bindings, &resource, Some(&state.attributes));
                refreshed.read.insert(resource.id.clone());
            }
            refreshed.resources.push(resource);
            continue;
        }

        let current = read_current(provider, &state.state_of(&resource.id)).await?;
        bind(
            &mut refreshed.bindings,
            &resource,
            current.exists.then_some(&current.attributes),
        );
        refreshed.current_states.insert(resource.id.clone(), current);
        refreshed.resources.push(resource);
    }

    // Tracked resources no longer in the manifest are planned for deletion
    let desired_ids: HashSet<&ResourceId> = desired.iter().map(|r| &r.id).collect();
    for tracked in &state.resources {
        let id = tracked.id();
        if desired_ids.contains(&id) {
            continue;
        }
        let current = read_current(provider, &tracked.to_state()).await?;
        if current.exists {
            refreshed.current_states.insert(id, current);
        }
    }

    Ok(refreshed)
}

/// Drop tracked resources that refresh found gone
fn forget_vanished(state: &mut StateFile, refreshed: &Refreshed) -> bool {
    let before = state.resources.len();
    state.resources.retain(|r| {
        refreshed
            .current_states
            .get(&r.id())
            .is_none_or(|current| current.exists)
    });
    let desired_ids: HashSet<ResourceId> = refreshed.resources.iter().map(|r| r.id.clone()).collect();
    state
        .resources
        .retain(|r| desired_ids.contains(&r.id()) || refreshed.current_states.contains_key(&r.id()));
    state.resources.len() != before
}

// =============================================================================
// Commands
// =============================================================================

fn run_validate(file: &Path) -> Result<(), String> {
    let manifest = Manifest::load(file)?;
    let resources = prepare_resources(&manifest, &get_schemas())?;

    println!("{}", "Validating...".cyan());
    println!(
        "{}",
        format!(
            "✓ {} resources and data sources validated successfully.",
            resources.len()
        )
        .green()
        .bold()
    );
    for resource in &resources {
        let kind = if resource.is_data_source() { "data" } else { "resource" };
        println!("  • {} ({})", resource.id, kind);
    }
    Ok(())
}

async fn run_plan(file: &Path) -> Result<(), String> {
    let workspace = Workspace::load(file).await?;
    let schemas = get_schemas();
    let desired = prepare_resources(&workspace.manifest, &schemas)?;
    let provider = build_provider(&workspace.manifest)?;

    let refreshed = refresh(&provider, &desired, &workspace.state).await?;
    let plan = create_plan(&refreshed.resources, &refreshed.current_states, &schemas);
    print_plan(&plan, &schemas);
    Ok(())
}

async fn run_apply(file: &Path) -> Result<(), String> {
    let mut workspace = Workspace::load(file).await?;
    let schemas = get_schemas();
    let desired = prepare_resources(&workspace.manifest, &schemas)?;
    let provider = build_provider(&workspace.manifest)?;

    workspace
        .locked("apply", async move |ws: &mut Workspace| {
            apply(ws, provider, &schemas, &desired).await
        })
        .await
}

async fn apply(
    ws: &mut Workspace,
    provider: HuaweiCloudProvider,
    schemas: &HashMap<String, ResourceSchema>,
    desired: &[Resource],
) -> Result<(), String> {
    let refreshed = refresh(&provider, desired, &ws.state).await?;
    if forget_vanished(&mut ws.state, &refreshed) {
        ws.save().await?;
    }

    let plan = create_plan(&refreshed.resources, &refreshed.current_states, schemas);
    if plan.mutation_count() == 0 {
        println!("{}", "No changes needed.".green());
        return Ok(());
    }

    print_plan(&plan, schemas);
    println!();
    println!("{}", "Applying changes...".cyan().bold());
    println!();

    let provider_name = provider.name();
    let protected = ws.manifest.protected();
    let dependencies: HashMap<ResourceId, Vec<String>> = desired
        .iter()
        .map(|r| {
            let mut deps: Vec<String> = resource_dependencies(r).into_iter().collect();
            deps.sort();
            (r.id.clone(), deps)
        })
        .collect();

    let interpreter = Interpreter::new(provider);
    let mut bindings = refreshed.bindings;
    let mut success_count = 0;
    let mut failure_count = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    for effect in plan.effects() {
        if let Effect::Read { resource } = effect
            && refreshed.read.contains(&resource.id)
        {
            continue;
        }

        // References to resources created earlier in this run resolve now
        let effect = resolve_effect(effect, &bindings);
        if let Some(target) = effect.target()
            && target.attributes.values().any(Value::contains_unresolved_ref)
        {
            println!(
                "  {} {} - unresolved reference",
                "✗".red(),
                format_effect(&effect)
            );
            failure_count += 1;
            continue;
        }

        let outcome = tokio::select! {
            outcome = interpreter.execute(&effect) => outcome,
            _ = &mut ctrl_c => {
                println!();
                println!(
                    "{}",
                    "Interrupted. State of completed changes has been saved.".yellow().bold()
                );
                return Err(format!(
                    "Apply interrupted while processing {}",
                    effect.resource_id()
                ));
            }
        };

        match outcome {
            Ok(outcome) => {
                if let (Some(target), Some(state)) = (effect.target(), outcome.state()) {
                    bind(&mut bindings, target, Some(&state.attributes));
                }
                if !effect.is_mutating() {
                    continue;
                }
                println!("  {} {}", "✓".green(), format_effect(&effect));
                success_count += 1;

                let id = effect.resource_id();
                match &outcome {
                    EffectOutcome::Deleted => {
                        ws.state.remove_resource(&id.resource_type, &id.name);
                    }
                    other => {
                        let Some(state) = other.state() else {
                            continue;
                        };
                        ws.state.upsert_resource(
                            ResourceState::from_state(state, provider_name)
                                .with_protected(protected.contains(&id.name))
                                .with_dependencies(dependencies.get(id).cloned().unwrap_or_default()),
                        );
                    }
                }
                ws.save().await?;
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(&effect), e);
                failure_count += 1;
            }
        }
    }

    println!();
    if failure_count == 0 {
        println!(
            "{}",
            format!("Apply complete! {} changes applied.", success_count)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Apply failed. {} succeeded, {} failed.",
            success_count, failure_count
        ))
    }
}

fn resolve_effect(effect: &Effect, bindings: &Bindings) -> Effect {
    match effect {
        Effect::Read { resource } => Effect::Read {
            resource: resolve_resource(resource, bindings),
        },
        Effect::Create(resource) => Effect::Create(resolve_resource(resource, bindings)),
        Effect::Update {
            id,
            from,
            to,
            changed_attributes,
        } => Effect::Update {
            id: id.clone(),
            from: from.clone(),
            to: resolve_resource(to, bindings),
            changed_attributes: changed_attributes.clone(),
        },
        Effect::Replace {
            from,
            to,
            changed_attributes,
        } => Effect::Replace {
            from: from.clone(),
            to: resolve_resource(to, bindings),
            changed_attributes: changed_attributes.clone(),
        },
        Effect::Delete(state) => Effect::Delete(state.clone()),
    }
}

/// Dependents before the resources they reference
fn destroy_order(state: &StateFile) -> Result<Vec<ResourceState>, String> {
    let nodes: Vec<(String, HashSet<String>)> = state
        .resources
        .iter()
        .map(|r| (r.name.clone(), r.dependencies.iter().cloned().collect()))
        .collect();
    let mut order = topological_order(&nodes)?;
    order.reverse();
    Ok(order.into_iter().map(|i| state.resources[i].clone()).collect())
}

async fn run_destroy(file: &Path, auto_approve: bool) -> Result<(), String> {
    let mut workspace = Workspace::load(file).await?;
    if workspace.state.resources.is_empty() {
        println!("{}", "No resources to destroy.".green());
        return Ok(());
    }

    let order = destroy_order(&workspace.state)?;
    let manifest_protected = workspace.manifest.protected();
    let protected: Vec<String> = order
        .iter()
        .filter(|r| r.protected || manifest_protected.contains(&r.name))
        .map(|r| r.id().to_string())
        .collect();
    if !protected.is_empty() {
        return Err(format!(
            "Refusing to destroy protected resources: {}",
            protected.join(", ")
        ));
    }

    let provider = build_provider(&workspace.manifest)?;

    println!("{}", "Destroy Plan:".red().bold());
    println!();
    for resource in &order {
        println!("  {} {}", "-".red().bold(), resource.id());
    }
    println!();
    println!("Plan: {} to destroy.", order.len().to_string().red());
    println!();

    if !auto_approve && !confirm("Do you really want to destroy all resources?")? {
        println!();
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(());
    }

    workspace
        .locked("destroy", async move |ws: &mut Workspace| {
            destroy(ws, provider, order).await
        })
        .await
}

async fn destroy(
    ws: &mut Workspace,
    provider: HuaweiCloudProvider,
    order: Vec<ResourceState>,
) -> Result<(), String> {
    println!("{}", "Destroying resources...".red().bold());
    println!();

    let interpreter = Interpreter::new(provider);
    let mut success_count = 0;
    let mut failure_count = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    for resource in order {
        let effect = Effect::Delete(resource.to_state());
        let outcome = tokio::select! {
            outcome = interpreter.execute(&effect) => outcome,
            _ = &mut ctrl_c => {
                println!();
                println!(
                    "{}",
                    "Interrupted. Resources destroyed so far were removed from state.".yellow().bold()
                );
                return Err(format!("Destroy interrupted while deleting {}", resource.id()));
            }
        };

        match outcome {
            Ok(_) => {
                println!("  {} {}", "✓".green(), format_effect(&effect));
                success_count += 1;
                ws.state.remove_resource(&resource.resource_type, &resource.name);
                ws.save().await?;
            }
            Err(e) => {
                println!("  {} {} - {}", "✗".red(), format_effect(&effect), e);
                failure_count += 1;
            }
        }
    }

    println!();
    if failure_count == 0 {
        println!(
            "{}",
            format!("Destroy complete! {} resources destroyed.", success_count)
                .green()
                .bold()
        );
        Ok(())
    } else {
        Err(format!(
            "Destroy failed. {} succeeded, {} failed.",
            success_count, failure_count
        ))
    }
}

fn confirm(question: &str) -> Result<bool, String> {
    println!("{}", question.yellow().bold());
    println!(
        "  {}",
        "This action cannot be undone. Type 'yes' to confirm.".yellow()
    );
    print!("\n  Enter a value: ");
    std::io::Write::flush(&mut std::io::stdout()).map_err(|e| e.to_string())?;

    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .map_err(|e| e.to_string())?;
    Ok(input.trim() == "yes")
}

/// Split `type.name`
fn parse_address(address: &str) -> Result<(&str, &str), String> {
    address
        .split_once('.')
        .filter(|(t, n)| !t.is_empty() && !n.is_empty())
        .ok_or_else(|| format!("Invalid resource address '{}', expected type.name", address))
}

async fn run_state_command(file: &Path, command: StateCommands) -> Result<(), String> {
    let mut workspace = Workspace::load(file).await?;

    match command {
        StateCommands::List => {
            if workspace.state.resources.is_empty() {
                println!("{}", "No resources in state.".yellow());
            }
            for resource in &workspace.state.resources {
                let marker = if resource.protected { " (protected)" } else { "" };
                println!(
                    "{}  {}{}",
                    resource.id(),
                    resource.identifier.as_deref().unwrap_or("-").dimmed(),
                    marker
                );
            }
            Ok(())
        }
        StateCommands::Show { address } => {
            let (resource_type, name) = parse_address(&address)?;
            let resource = workspace
                .state
                .find_resource(resource_type, name)
                .ok_or_else(|| format!("{} is not in state", address))?;
            let text = serde_json::to_string_pretty(resource).map_err(|e| e.to_string())?;
            println!("{}", text);
            Ok(())
        }
        StateCommands::Rm { address } => {
            let (resource_type, name) = parse_address(&address)?;
            let (resource_type, name) = (resource_type.to_string(), name.to_string());
            workspace
                .locked("state rm", async move |ws: &mut Workspace| {
                    ws.state
                        .remove_resource(&resource_type, &name)
                        .ok_or_else(|| format!("{}.{} is not in state", resource_type, name))?;
                    ws.save().await
                })
                .await?;
            println!("{} {}", "Removed".green(), address);
            Ok(())
        }
        StateCommands::Unlock { lock_id } => {
            workspace
                .backend
                .force_unlock(&lock_id)
                .await
                .map_err(|e| e.to_string())?;
            println!("{} {}", "Released lock".green(), lock_id);
            Ok(())
        }
    }
}

fn run_schema(resource_type: Option<&str>) -> Result<(), String> {
    let schemas = get_schemas();
    match resource_type {
        Some(name) => {
            let schema = schemas
                .get(name)
                .ok_or_else(|| format!("Unknown resource type: {}", name))?;
            print_schema(schema);
        }
        None => {
            let mut all: Vec<ResourceSchema> = schemas.into_values().collect();
            all.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));
            print_schema_list(&all);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn manifest(text: &str) -> Manifest {
        Manifest::parse(text).unwrap()
    }

    #[test]
    fn valid_manifest_is_sorted_by_references() {
        let manifest = manifest(
            r#"{"resources": [
                {"type": "elb_member", "name": "app1", "attributes": {
                    "pool_id": "${web.id}", "address": "192.168.0.10", "protocol_port": 8080}},
                {"type": "elb_pool", "name": "web", "attributes": {
                    "protocol": "HTTP", "lb_method": "ROUND_ROBIN", "loadbalancer_id": "lb-1"}}
            ]}"#,
        );
        let resources = prepare_resources(&manifest, &get_schemas()).unwrap();
        let names: Vec<&str> = resources.iter().map(|r| r.id.name.as_str()).collect();
        assert_eq!(names, vec!["web", "app1"]);
    }

    #[test]
    fn schema_errors_are_collected_per_resource() {
        let manifest = manifest(
            r#"{
                "resources": [
                    {"type": "elb_nothing", "name": "x"},
                    {"type": "elb_pool", "name": "web", "attributes": {"protocol": "HTTP", "lb_method": "ROUND_ROBIN"}}
                ],
                "data": [{"type": "elb_pool", "name": "misplaced"}]
            }"#,
        );
        let err = prepare_resources(&manifest, &get_schemas()).unwrap_err();
        assert!(err.contains("elb_nothing.x: unknown resource type"));
        assert!(err.contains("elb_pool.web: Exactly one of"));
        assert!(err.contains("elb_pool.misplaced: must be declared under \"resources\""));
    }

    #[test]
    fn destroy_removes_dependents_first() {
        let mut state = StateFile::new();
        state.upsert_resource(ResourceState::new("elb_loadbalancer", "lb", "huaweicloud"));
        state.upsert_resource(
            ResourceState::new("elb_listener", "http", "huaweicloud").with_dependencies(vec!["lb".to_string()]),
        );
        state.upsert_resource(
            ResourceState::new("elb_pool", "web", "huaweicloud")
                .with_dependencies(vec!["http".to_string(), "lb".to_string()]),
        );

        let names: Vec<String> = destroy_order(&state)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["web", "http", "lb"]);
    }

    #[test]
    fn vanished_resources_are_forgotten() {
        let mut state = StateFile::new();
        state.upsert_resource(ResourceState::new("elb_pool", "web", "huaweicloud"));
        state.upsert_resource(ResourceState::new("elb_pool", "gone", "huaweicloud"));
        state.upsert_resource(ResourceState::new("elb_pool", "orphan_gone", "huaweicloud"));

        let web = ResourceId::new("elb_pool", "web");
        let gone = ResourceId::new("elb_pool", "gone");
        let refreshed = Refreshed {
            resources: vec![Resource::new("elb_pool", "web"), Resource::new("elb_pool", "gone")],
            current_states: HashMap::from([
                (web.clone(), State::existing(web, HashMap::new())),
                (gone.clone(), State::not_found(gone)),
            ]),
            bindings: Bindings::new(),
            read: HashSet::new(),
        };

        assert!(forget_vanished(&mut state, &refreshed));
        let names: Vec<&str> = state.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["web"]);
        assert!(!forget_vanished(&mut state, &refreshed));
    }

    #[test]
    fn addresses_need_type_and_name() {
        assert_eq!(parse_address("elb_pool.web").unwrap(), ("elb_pool", "web"));
        assert!(parse_address("elb_pool").is_err());
        assert!(parse_address(".web").is_err());
    }

    #[test]
    fn effects_pick_up_new_bindings() {
        let mut bindings = Bindings::new();
        bindings.insert(
            "web".to_string(),
            HashMap::from([("id".to_string(), Value::String("pool-1".to_string()))]),
        );
        let member = Resource::new("elb_member", "app1")
            .with_attribute("pool_id", Value::ResourceRef("web".to_string(), "id".to_string()));

        let resolved = resolve_effect(&Effect::Create(member), &bindings);
        assert_eq!(
            resolved.target().and_then(|r| r.attributes.get("pool_id")),
            Some(&Value::String("pool-1".to_string()))
        );
    }
}

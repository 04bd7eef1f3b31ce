//! Operator commands acting on experiments and campaigns.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::{json, Value as Json};

use crate::commands::context::{CommandArgs, CommandContext};
use crate::commands::descriptor::{Autocomplete, BaseDir, CommandDescriptor, Expand, Gate, Severity};
use crate::commands::pipeline::{Invocation, Shell};
use crate::config::simulation::{read_config, write_config};
use crate::error::{CommandError, CommandResult};
use crate::experiment::blocks::{Resolved, BUILDING_BLOCKS_FILE};
use crate::experiment::build_cache::{BuildKey, Claim};
use crate::experiment::params::{Catalog, SimulationParams};
use crate::experiment::structure::{
    check_structure, get_experiments, list_campaigns, list_experiments, EXPERIMENT_STRUCTURE,
};
use crate::experiment::templates::{self, copy_files, move_files, remove_files, WITHOUT_MALICIOUS, WITH_MALICIOUS};
use crate::experiment::{contiki, wsn};
use crate::models::value::{Kwargs, Value};
use crate::toolchain;

const BASE: &str = "BASE";

const EXPERIMENT_MISSING: &str = " > Experiment '{name}' does not exist !";
const CAMPAIGN_MISSING: &str = " > Experiment campaign '{exp_file}' does not exist !";

fn experiments(shell: &Shell) -> Vec<String> {
    list_experiments(&shell.settings().experiments_folder, true)
}

fn all_experiments(shell: &Shell) -> Vec<String> {
    list_experiments(&shell.settings().experiments_folder, false)
}

fn campaigns(shell: &Shell) -> Vec<String> {
    list_campaigns(&shell.settings().experiments_folder)
}

fn experiment_path() -> Expand {
    Expand::new("name", BaseDir::Experiments).new_arg("path")
}

fn campaign_file() -> Expand {
    Expand::new("exp_file", BaseDir::Experiments).ext("json")
}

fn shell_of(ctx: &CommandContext) -> Result<&Arc<Shell>, CommandError> {
    ctx.shell()
        .ok_or_else(|| CommandError::InvalidValue("campaign commands run from a shell".to_string()))
}

fn kwargs(entries: &[(&str, Value)]) -> Kwargs {
    entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn campaign_params(value: &Json) -> Result<Kwargs, CommandError> {
    serde_json::from_value(value.clone())
        .map_err(|e| CommandError::InvalidValue(format!("invalid experiment parameters: {}", e)))
}

fn motes(path: &Path) -> (PathBuf, PathBuf) {
    (
        path.join(WITH_MALICIOUS).join("motes"),
        path.join(WITHOUT_MALICIOUS).join("motes"),
    )
}

fn check_external_library(params: &SimulationParams) -> Result<(), CommandError> {
    match params.ext_lib.as_deref() {
        Some(ext_lib) if !Path::new(ext_lib).is_dir() => Err(CommandError::InvalidValue(format!(
            "External library {} does not exist !",
            ext_lib
        ))),
        _ => Ok(()),
    }
}

fn build_key(params: &SimulationParams) -> BuildKey {
    BuildKey {
        target: params.target.clone(),
        root: params.mtype_root.clone(),
        sensor: params.mtype_sensor.clone(),
        debug: params.debug,
    }
}

fn building_blocks(params: &SimulationParams, ctx: &CommandContext) -> Result<Resolved, CommandError> {
    Resolved::load(&ctx.settings.templates_folder.join(BUILDING_BLOCKS_FILE), &params.blocks)
}

pub fn make(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let path = args.path("path")?;
    debug!(" > Validating parameters...");
    let params = SimulationParams::validate(args.kwargs(), &Catalog::scan(&ctx.settings));
    check_external_library(&params)?;
    debug!(" > Creating simulation...");
    check_structure(&path, EXPERIMENT_STRUCTURE, true, true)?;
    let blocks = building_blocks(&params, ctx)?;
    let network = wsn::generate(&params, &mut rand::thread_rng());
    templates::deploy(
        &ctx.settings.experiment_templates(),
        &path,
        &params,
        &ctx.settings.contiki_folder,
        &network,
        &blocks.defines(),
    )?;
    write_config(&path, &params.to_config())?;

    let (with_malicious, _) = motes(&path);
    let mut targets = vec![params.target.as_str()];
    if params.malicious_target != params.target {
        targets.push(params.malicious_target.as_str());
    }
    let local = contiki::copy_reduced(&ctx.settings.contiki_folder, &with_malicious, &targets)?;
    let built = contiki::apply_debug_flags(&contiki::rpl_folder(&local), params.debug)
        .and_then(|()| compile_motes(&path, &params, &local, ctx))
        .and_then(|()| build_malicious(&path, &params, &blocks, &local, ctx));
    contiki::remove(&local);
    built?;
    Ok(Some("Experiment folder made".to_string()))
}

/// Compiles root and sensor motes, or copies them from another experiment that already built the same ones.
fn compile_motes(path: &Path, params: &SimulationParams, local: &Path, ctx: &CommandContext) -> Result<(), CommandError> {
    let (with_malicious, without_malicious) = motes(path);
    let key = build_key(params);
    let binaries = key.binaries();
    let names = [binaries[0].as_str(), binaries[1].as_str()];
    loop {
        match ctx.build_cache.claim(key.clone(), &without_malicious, ctx.cancel_token()) {
            None => return Err(CommandError::Cancelled),
            Some(Claim::Reuse(folder)) => {
                debug!(" > Reusing '{}' and '{}' from {}", names[0], names[1], folder.display());
                match copy_files(&folder, &without_malicious, &names) {
                    Ok(()) => break,
                    Err(e) => {
                        debug!(" > Cannot reuse {}: {}", folder.display(), e);
                        ctx.build_cache.forget(&key, &folder);
                    }
                }
            }
            Some(Claim::Compile(guard)) => {
                for mote in ["root", "sensor"] {
                    debug!(" > Making '{}.{}'...", mote, params.target);
                    toolchain::run(&with_malicious, &format!("make {} CONTIKI={}", mote, local.display()), ctx)?;
                }
                // 'make clean' would remove them otherwise
                move_files(&with_malicious, &without_malicious, &names)?;
                toolchain::run(&with_malicious, "make clean", ctx)?;
                guard.publish(without_malicious.clone());
                break;
            }
        }
    }
    remove_files(&with_malicious, &["root.c", "sensor.c"]);
    Ok(())
}

fn build_malicious(
    path: &Path,
    params: &SimulationParams,
    blocks: &Resolved,
    local: &Path,
    ctx: &CommandContext,
) -> Result<(), CommandError> {
    let (with_malicious, without_malicious) = motes(path);
    let rpl = contiki::rpl_folder(local);
    if let Some(ext_lib) = &params.ext_lib {
        contiki::replace_rpl(&rpl, Path::new(ext_lib))?;
    }
    contiki::apply_replacements(&rpl, &blocks.replacements)?;

    let malicious = format!("malicious.{}", params.malicious_target);
    let binaries = build_key(params).binaries();
    debug!(" > Making '{}'...", malicious);
    toolchain::run(
        &with_malicious,
        &format!(
            "make malicious CONTIKI={} TARGET={}",
            local.display(),
            params.malicious_target
        ),
        ctx,
    )?;
    move_files(&with_malicious, &without_malicious, &[malicious.as_str()])?;
    toolchain::run(&with_malicious, "make clean", ctx)?;
    move_files(&without_malicious, &with_malicious, &[malicious.as_str()])?;
    copy_files(&without_malicious, &with_malicious, &[binaries[0].as_str(), binaries[1].as_str()])?;
    remove_files(&with_malicious, &["malicious.c"]);
    Ok(())
}

pub fn remake(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let path = args.path("path")?;
    debug!(" > Retrieving parameters...");
    let params = SimulationParams::from_config(&read_config(&path))?;
    check_external_library(&params)?;
    let blocks = building_blocks(&params, ctx)?;
    debug!(" > Recompiling malicious mote...");
    templates::deploy_malicious(&ctx.settings.experiment_templates(), &path, &params, &blocks.defines())?;
    let (with_malicious, _) = motes(&path);
    let local = contiki::copy_reduced(
        &ctx.settings.contiki_folder,
        &with_malicious,
        &[params.malicious_target.as_str()],
    )?;
    let built = build_malicious(&path, &params, &blocks, &local, ctx);
    contiki::remove(&local);
    built?;
    Ok(Some("Experiment folder remade".to_string()))
}

pub fn run(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let path = args.path("path")?;
    check_structure(&path, EXPERIMENT_STRUCTURE, false, true)?;
    let task = ctx.task.as_deref().unwrap_or("run");
    for sim in [WITHOUT_MALICIOUS, WITH_MALICIOUS] {
        let sim_path = path.join(sim);
        debug!(
            " > Running simulation {} the malicious mote...",
            sim.trim_end_matches("-malicious")
        );
        let output = toolchain::run(&sim_path, &format!("make run TASK={}", task), ctx)?;
        remove_files(&sim_path, &[format!(".{}", task).as_str()]);
        let errors = toolchain::simulation_errors(&output);
        if !errors.is_empty() {
            for block in &errors {
                error!("Cooja error:\n{}", block);
            }
            warn!("Cooja failed to execute ; 'run' interrupted (no parsing done)");
            return Err(CommandError::Simulation("Cooja failed to execute".to_string()));
        }
        if sim_path.join("COOJA.log").exists() {
            let results = sim_path.join("results");
            fs::create_dir_all(&results)
                .map_err(|e| CommandError::io(format!("creating {}", results.display()), e))?;
            move_files(&sim_path, &results, &["COOJA.log"])?;
        }
    }
    Ok(Some("Both Cooja executions succeeded".to_string()))
}

pub fn clean(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let path = args.path("path")?;
    let name = args.str("name")?;
    if !ctx.shell().is_some_and(|shell| shell.task_pending(&name)) {
        debug!(" > Cleaning folder...");
        fs::remove_dir_all(&path).map_err(|e| CommandError::io(format!("removing {}", path.display()), e))?;
    }
    Ok(Some("Cleaned".to_string()))
}

pub fn clean_all(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let shell = shell_of(ctx)?;
    let silent = args.bool_or("silent", false);
    let experiments = get_experiments(&args.path("exp_file")?, silent)?;
    for name in experiments.keys().filter(|name| *name != BASE) {
        shell.invoke(
            "clean",
            Invocation::call(
                vec![name.as_str().into()],
                kwargs(&[("ask", false.into()), ("silent", silent.into())]),
            ),
        )?;
    }
    Ok(None)
}

pub fn make_all(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let shell = shell_of(ctx)?;
    let exp_file = args.path("exp_file")?;
    shell.invoke(
        "clean_all",
        Invocation::call(
            vec![Value::from(exp_file.to_string_lossy().into_owned())],
            kwargs(&[("silent", true.into())]),
        ),
    )?;
    let experiments = get_experiments(&exp_file, true)?;
    let base = experiments
        .get(BASE)
        .and_then(|base| base.get("simulation").and_then(Json::as_object));
    let campaign = exp_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    for (name, params) in experiments.iter().filter(|(name, _)| *name != BASE) {
        let mut params = params.clone();
        if let (Some(base), Some(params)) = (base, params.as_object_mut()) {
            let simulation = params
                .entry("simulation")
                .or_insert_with(|| Json::Object(Default::default()));
            if let Some(simulation) = simulation.as_object_mut() {
                for (key, value) in base {
                    simulation.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        let mut params = campaign_params(&params)?;
        params.insert("campaign".to_string(), campaign.as_str().into());
        params.insert("ask".to_string(), false.into());
        shell.invoke("make", Invocation::call(vec![name.as_str().into()], params))?;
    }
    Ok(None)
}

pub fn remake_all(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let shell = shell_of(ctx)?;
    let experiments = get_experiments(&args.path("exp_file")?, false)?;
    for (name, params) in experiments.iter().filter(|(name, _)| *name != BASE) {
        let params = campaign_params(params)?;
        shell.invoke("remake", Invocation::call(vec![name.as_str().into()], params))?;
    }
    Ok(None)
}

pub fn run_all(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let shell = shell_of(ctx)?;
    let experiments = get_experiments(&args.path("exp_file")?, false)?;
    for name in experiments.keys().filter(|name| *name != BASE) {
        shell.invoke("run", Invocation::call(vec![name.as_str().into()], Kwargs::new()))?;
    }
    Ok(None)
}

fn campaign_template(catalog: &Catalog) -> String {
    let defaults = SimulationParams::default();
    let listing = |title: &str, items: &Option<Vec<String>>| {
        let mut lines = vec![format!("// {}:", title)];
        lines.extend(items.iter().flatten().map(|item| format!("//  - {}", item)));
        lines.join("\n")
    };
    let header = [
        listing("Available building blocks", &catalog.building_blocks),
        listing("Available root mote types", &catalog.root_types),
        listing("Available sensor mote types", &catalog.sensor_types),
        listing("Available malicious mote types", &catalog.malicious_types),
    ]
    .join("\n");
    let campaign = json!({
        "BASE": {
            "simulation": {
                "title": "Campaign title",
                "goal": "",
                "notes": "",
                "duration": defaults.duration,
                "number-motes": defaults.n,
                "target": defaults.target,
                "area-square-side": defaults.area_side,
                "transmission-range": defaults.tx_range,
                "wsn-generation-algorithm": defaults.wsn_gen_algo,
            }
        },
        "experiment-1": {
            "malicious": {
                "type": "sensor",
                "building-blocks": [],
            }
        }
    });
    let body = serde_json::to_string_pretty(&campaign).unwrap_or_default();
    format!("{}\n{}\n", header, body)
}

pub fn prepare(args: &CommandArgs, ctx: &CommandContext) -> CommandResult {
    let exp_file = args.path("exp_file")?;
    if let Some(parent) = exp_file.parent() {
        fs::create_dir_all(parent).map_err(|e| CommandError::io(format!("creating {}", parent.display()), e))?;
    }
    fs::write(&exp_file, campaign_template(&Catalog::scan(&ctx.settings)))
        .map_err(|e| CommandError::io(format!("writing {}", exp_file.display()), e))?;
    Ok(None)
}

pub fn drop_campaign(args: &CommandArgs, _ctx: &CommandContext) -> CommandResult {
    let exp_file = args.path("exp_file")?;
    if exp_file.exists() {
        fs::remove_file(&exp_file).map_err(|e| CommandError::io(format!("removing {}", exp_file.display()), e))?;
    }
    Ok(None)
}

const CAMPAIGN_DOC: &str = ":param exp_file: experiments JSON filename or basename (absolute or relative path ; \
     if no path provided, the JSON file is searched in the experiments folder)";

fn campaign_command(
    name: &'static str,
    description: &str,
    f: fn(&CommandArgs, &CommandContext) -> CommandResult,
) -> CommandDescriptor {
    CommandDescriptor::new(name, f)
        .doc(&format!("{}\n{}", description, CAMPAIGN_DOC))
        .param("exp_file")
        .expand(campaign_file())
        .examples(&["my-simulation-campaign"])
        .autocomplete(Autocomplete::Lazy(campaigns))
}

/// Experiment and campaign commands, ready for registration.
pub fn descriptors() -> Vec<CommandDescriptor> {
    let campaign_missing = || Gate::must_exist("exp_file").log(Severity::Error, CAMPAIGN_MISSING);
    vec![
        CommandDescriptor::new("make", make)
            .doc("Make a new experiment.\n:param name: experiment name (or absolute path to experiment)\n:param ask: ask confirmation")
            .param("name")
            .param_default("ask", true)
            .pooled()
            .expand(experiment_path())
            .gate(
                Gate::must_not_exist("path")
                    .log(Severity::Warning, " > Experiment '{name}' already exists !")
                    .confirm("ask", "Proceed anyway ? (yes|no) [default: no] "),
            )
            .start_msg("CREATING EXPERIMENT '{name}'")
            .examples(&["my-simulation", "my-simulation target=z1 debug=true"])
            .autocomplete(Autocomplete::Lazy(experiments)),
        CommandDescriptor::new("remake", remake)
            .doc("Remake the malicious mote of an experiment, leaving the other simulation files unchanged.\n:param name: experiment name")
            .param("name")
            .pooled()
            .expand(experiment_path())
            .gate(Gate::must_exist("path").log(Severity::Error, EXPERIMENT_MISSING))
            .start_msg("REMAKING MALICIOUS MOTE FOR EXPERIMENT '{name}'")
            .examples(&["my-simulation"])
            .autocomplete(Autocomplete::Lazy(experiments)),
        CommandDescriptor::new("run", run)
            .doc("Run an experiment.\n:param name: experiment name")
            .param("name")
            .pooled_nested()
            .expand(experiment_path())
            .gate(Gate::must_exist("path").log(Severity::Error, EXPERIMENT_MISSING))
            .start_msg("PROCESSING EXPERIMENT '{name}'")
            .examples(&["my-simulation"])
            .autocomplete(Autocomplete::Lazy(experiments)),
        CommandDescriptor::new("clean", clean)
            .doc("Remove an experiment.\n:param name: experiment name (or absolute path to experiment)\n:param ask: ask confirmation")
            .param("name")
            .param_default("ask", true)
            .expand(experiment_path())
            .gate(Gate::must_exist("path").log(Severity::Error, EXPERIMENT_MISSING))
            .gate(Gate::must_not_exist("path").confirm("ask", "Are you sure ? (yes|no) [default: no] "))
            .start_msg("CLEANING EXPERIMENT '{name}'")
            .examples(&["my-simulation"])
            .autocomplete(Autocomplete::Lazy(all_experiments)),
        campaign_command("clean_all", "Remove every experiment of a campaign.", clean_all).gate(campaign_missing()),
        campaign_command("make_all", "Make a campaign of experiments.", make_all).gate(campaign_missing()),
        campaign_command(
            "remake_all",
            "Remake a campaign of experiments (that is, rebuild the malicious mote of each experiment).",
            remake_all,
        )
        .gate(campaign_missing()),
        campaign_command("run_all", "Run a campaign of experiments.", run_all).gate(campaign_missing()),
        campaign_command(
            "prepare",
            "Create a campaign of experiments from a template.\n:param ask: ask confirmation",
            prepare,
        )
        .param_default("ask", true)
        .gate(
            Gate::must_not_exist("exp_file")
                .log(Severity::Warning, " > Experiment campaign '{exp_file}' already exists !")
                .confirm("ask", "Overwrite ? (yes|no) [default: no] "),
        )
        .start_msg("CREATING NEW EXPERIMENT CAMPAIGN AT '{exp_file}'"),
        campaign_command(
            "drop",
            "Remove a campaign of experiments.\n:param ask: ask confirmation",
            drop_campaign,
        )
        .param_default("ask", true)
        .gate(Gate::must_not_exist("exp_file").confirm("ask", "Are you sure ? (yes|no) [default: no] "))
        .start_msg("REMOVING EXPERIMENT CAMPAIGN AT '{exp_file}'"),
    ]
}

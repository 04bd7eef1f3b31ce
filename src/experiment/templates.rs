//! Experiment folders are filled from Handlebars templates.
//!
//! Each template gets its own context: the simulation file lists the mote types and the motes
//! of its folder, the script gets its timings, the Makefiles get the Contiki path.

use std::fs;
use std::path::Path;

use handlebars::{handlebars_helper, Handlebars};
use log::debug;
use serde::Serialize;
use serde_json::{json, Value as Json};

use crate::error::CommandError;
use crate::experiment::params::SimulationParams;
use crate::experiment::wsn::Mote;

pub const WITH_MALICIOUS: &str = "with-malicious";
pub const WITHOUT_MALICIOUS: &str = "without-malicious";

// Cooja numbers motes from 1
handlebars_helper!(inc: |v: u64| v + 1);

/// Template engine without HTML escaping: the outputs are C, JavaScript, XML and Markdown files
/// whose values are inserted verbatim.
fn engine() -> Handlebars<'static> {
    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_helper("inc", Box::new(inc));
    hb
}

fn io_err(action: &str, path: &Path) -> impl FnOnce(std::io::Error) -> CommandError {
    let context = format!("{} {}", action, path.display());
    move |e| CommandError::io(context, e)
}

pub fn render_file<T: Serialize>(hb: &Handlebars<'_>, src: &Path, dst: &Path, data: &T) -> Result<(), CommandError> {
    debug!(" > Setting template file: {}", dst.display());
    let text = fs::read_to_string(src).map_err(io_err("reading", src))?;
    let rendered = hb.render_template(&text, data).map_err(|e| CommandError::Template {
        name: src.display().to_string(),
        reason: e.to_string(),
    })?;
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(io_err("creating", parent))?;
    }
    fs::write(dst, rendered).map_err(io_err("writing", dst))
}

pub fn copy_files(src: &Path, dst: &Path, names: &[&str]) -> Result<(), CommandError> {
    for name in names {
        let from = src.join(name);
        fs::copy(&from, dst.join(name)).map_err(io_err("copying", &from))?;
    }
    Ok(())
}

pub fn move_files(src: &Path, dst: &Path, names: &[&str]) -> Result<(), CommandError> {
    for name in names {
        let from = src.join(name);
        fs::rename(&from, dst.join(name)).map_err(io_err("moving", &from))?;
    }
    Ok(())
}

pub fn remove_files(dir: &Path, names: &[&str]) {
    for name in names {
        let _ = fs::remove_file(dir.join(name));
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Serialize)]
struct MoteType<'a> {
    name: &'static str,
    description: &'static str,
    target: &'a str,
    target_capitalized: String,
}

impl<'a> MoteType<'a> {
    fn new(name: &'static str, description: &'static str, target: &'a str) -> Self {
        MoteType {
            name,
            description,
            target,
            target_capitalized: capitalize(target),
        }
    }
}

/// Context of `simulation.csc`. The folder without the malicious mote drops the last mote
/// and the malicious mote type.
fn simulation_context(params: &SimulationParams, motes: &[Mote], with_malicious: bool) -> Json {
    let mut mote_types = vec![
        MoteType::new("root", "DODAG root", &params.target),
        MoteType::new("sensor", "Normal sensor", &params.target),
        MoteType::new("malicious", "Malicious node", &params.malicious_target),
    ];
    let (suffix, motes) = if with_malicious {
        (" (with the malicious mote)", motes)
    } else {
        mote_types.pop();
        (" (without the malicious mote)", &motes[..motes.len().saturating_sub(1)])
    };
    json!({
        "title": format!("{}{}", params.title, suffix),
        "goal": params.goal,
        "notes": params.notes,
        "random_seed": "generate",
        "success_ratio_tx": 1.0,
        "success_ratio_rx": 1.0,
        "interference_range": params.int_range,
        "transmitting_range": params.tx_range,
        "target": params.target,
        "target_capitalized": capitalize(&params.target),
        "malicious_target": params.malicious_target,
        "malicious_target_capitalized": capitalize(&params.malicious_target),
        "mote_types": mote_types,
        "motes": motes,
    })
}

/// Fills both simulation folders of `path` from the experiment templates.
pub fn deploy(
    templates: &Path,
    path: &Path,
    params: &SimulationParams,
    contiki: &Path,
    motes: &[Mote],
    constants: &str,
) -> Result<(), CommandError> {
    let hb = engine();
    let timeout = 1000 * params.duration;
    let script = json!({"timeout": timeout, "sampling_period": timeout * 10});
    let contiki = contiki.display().to_string();
    let makefile = json!({"contiki": contiki});
    for (sim, with_malicious) in [(WITH_MALICIOUS, true), (WITHOUT_MALICIOUS, false)] {
        let sim_path = path.join(sim);
        render_file(&hb, &templates.join("Makefile"), &sim_path.join("Makefile"), &makefile)?;
        render_file(&hb, &templates.join("script.js"), &sim_path.join("script.js"), &script)?;
        render_file(
            &hb,
            &templates.join("simulation.csc"),
            &sim_path.join("simulation.csc"),
            &simulation_context(params, motes, with_malicious),
        )?;
    }

    let sources = templates.join("motes");
    let dst = path.join(WITH_MALICIOUS).join("motes");
    render_file(
        &hb,
        &sources.join("Makefile"),
        &dst.join("Makefile"),
        &json!({"contiki": contiki, "target": params.target}),
    )?;
    for (kind, mtype) in [("root", &params.mtype_root), ("sensor", &params.mtype_sensor)] {
        render_file(
            &hb,
            &sources.join(format!("{}.c", mtype)),
            &dst.join(format!("{}.c", kind)),
            &json!({}),
        )?;
    }
    deploy_malicious(templates, path, params, constants)?;

    let mut report = serde_json::to_value(params.to_config())
        .map_err(|e| CommandError::InvalidValue(format!("cannot describe the experiment: {}", e)))?;
    report["motes"] = json!(motes);
    render_file(&hb, &templates.join("report.md"), &path.join("report.md"), &report)
}

/// Renders the malicious mote source with the building-block constants.
pub fn deploy_malicious(templates: &Path, path: &Path, params: &SimulationParams, constants: &str) -> Result<(), CommandError> {
    render_file(
        &engine(),
        &templates.join(format!("motes/{}.c", params.mtype_malicious)),
        &path.join(WITH_MALICIOUS).join("motes/malicious.c"),
        &json!({"constants": constants}),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::wsn::MoteKind;
    use tempfile::TempDir;

    const CSC: &str = "<title>{{title}}</title><range>{{transmitting_range}}</range>
{{#each mote_types}}<motetype id=\"{{name}}\" class=\"{{target_capitalized}}MoteType\">{{description}}: motes/{{name}}.{{target}}</motetype>
{{/each}}{{#each motes}}<mote id=\"{{inc id}}\" type=\"{{type}}\" x=\"{{x}}\" y=\"{{y}}\" platform=\"{{../target}}\"/>
{{/each}}";

    fn templates(dir: &Path) {
        let motes = dir.join("motes");
        fs::create_dir_all(&motes).unwrap();
        fs::write(dir.join("Makefile"), "CONTIKI = {{ contiki }}\n").unwrap();
        fs::write(dir.join("simulation.csc"), CSC).unwrap();
        fs::write(dir.join("script.js"), "TIMEOUT({{ timeout }}); period = {{ sampling_period }};").unwrap();
        fs::write(dir.join("report.md"), "# {{ title }} ({{ n }} sensors, {{#each motes}}{{#if @last}}{{inc id}}{{/if}}{{/each}} motes)\n").unwrap();
        fs::write(motes.join("Makefile"), "TARGET = {{ target }}\n").unwrap();
        for mote in ["root-dummy", "sensor-dummy", "malicious-sensor"] {
            fs::write(motes.join(format!("{}.c", mote)), format!("/* {} */\n{{{{ constants }}}}", mote)).unwrap();
        }
    }

    fn network() -> Vec<Mote> {
        let kinds = [MoteKind::Root, MoteKind::Sensor, MoteKind::Sensor, MoteKind::Malicious];
        kinds
            .into_iter()
            .enumerate()
            .map(|(id, kind)| Mote {
                id,
                kind,
                x: id as f64 * 10.0,
                y: -5.5,
                z: 0.0,
            })
            .collect()
    }

    fn deployed(dir: &Path) -> std::path::PathBuf {
        let tpl = dir.join("templates");
        templates(&tpl);
        let exp = dir.join("E1");
        let params = SimulationParams {
            duration: 2,
            malicious_target: "sky".to_string(),
            ..SimulationParams::default()
        };
        deploy(
            &tpl,
            &exp,
            &params,
            Path::new("/opt/contiki"),
            &network(),
            "#define RPL_CONF_DIO_INTERVAL_MIN 0",
        )
        .unwrap();
        exp
    }

    #[test]
    fn simulation_lists_every_mote_and_mote_type() {
        let dir = TempDir::new().unwrap();
        let exp = deployed(dir.path());
        let csc = fs::read_to_string(exp.join("with-malicious/simulation.csc")).unwrap();
        assert!(csc.starts_with("<title>Default title (with the malicious mote)</title><range>50.0</range>\n"));
        assert!(csc.contains("<motetype id=\"root\" class=\"Z1MoteType\">DODAG root: motes/root.z1</motetype>"));
        assert!(csc.contains("<motetype id=\"sensor\" class=\"Z1MoteType\">Normal sensor: motes/sensor.z1</motetype>"));
        assert!(csc.contains("<motetype id=\"malicious\" class=\"SkyMoteType\">Malicious node: motes/malicious.sky</motetype>"));
        assert!(csc.contains("<mote id=\"1\" type=\"root\" x=\"0.0\" y=\"-5.5\" platform=\"z1\"/>"));
        assert!(csc.contains("<mote id=\"3\" type=\"sensor\" x=\"20.0\" y=\"-5.5\" platform=\"z1\"/>"));
        assert!(csc.contains("<mote id=\"4\" type=\"malicious\" x=\"30.0\""));
        assert_eq!(csc.matches("<mote id=").count(), 4);
    }

    #[test]
    fn simulation_without_malicious_mote_drops_it_and_its_type() {
        let dir = TempDir::new().unwrap();
        let exp = deployed(dir.path());
        let csc = fs::read_to_string(exp.join("without-malicious/simulation.csc")).unwrap();
        assert!(csc.starts_with("<title>Default title (without the malicious mote)</title>"));
        assert_eq!(csc.matches("<motetype ").count(), 2);
        assert_eq!(csc.matches("<mote id=").count(), 3);
        assert!(!csc.contains("malicious\""));
    }

    #[test]
    fn every_template_gets_its_own_context() {
        let dir = TempDir::new().unwrap();
        let exp = deployed(dir.path());
        let read = |p: &str| fs::read_to_string(exp.join(p)).unwrap();
        assert_eq!(read("without-malicious/script.js"), "TIMEOUT(2000); period = 20000;");
        assert_eq!(read("with-malicious/Makefile"), "CONTIKI = /opt/contiki\n");
        assert_eq!(read("with-malicious/motes/Makefile"), "TARGET = z1\n");
        assert_eq!(read("with-malicious/motes/root.c"), "/* root-dummy */\n");
        assert_eq!(
            read("with-malicious/motes/malicious.c"),
            "/* malicious-sensor */\n#define RPL_CONF_DIO_INTERVAL_MIN 0"
        );
        assert!(!exp.join("without-malicious/motes").exists());
        assert_eq!(read("report.md"), "# Default title (10 sensors, 4 motes)\n");
    }

    #[test]
    fn shipped_templates_render() {
        let shipped = Path::new(env!("CARGO_MANIFEST_DIR")).join("templates/experiment");
        let dir = TempDir::new().unwrap();
        let params = SimulationParams::default();
        let hb = engine();
        render_file(
            &hb,
            &shipped.join("simulation.csc"),
            &dir.path().join("simulation.csc"),
            &simulation_context(&params, &network(), true),
        )
        .unwrap();
        let csc = fs::read_to_string(dir.path().join("simulation.csc")).unwrap();
        assert_eq!(csc.matches("<motetype>").count(), 3);
        assert_eq!(csc.matches("<mote>").count(), 4);
        assert!(csc.contains("org.contikios.cooja.mspmote.Z1MoteType"));
        assert!(csc.contains("<id>4</id>"));

        render_file(&hb, &shipped.join("script.js"), &dir.path().join("script.js"), &json!({"timeout": 1000, "sampling_period": 10000}))
            .unwrap();
        let script = fs::read_to_string(dir.path().join("script.js")).unwrap();
        assert!(script.contains("TIMEOUT(1000, log.testOK());"));

        let mut report = serde_json::to_value(params.to_config()).unwrap();
        report["motes"] = json!(network());
        render_file(&hb, &shipped.join("report.md"), &dir.path().join("report.md"), &report).unwrap();
        let report = fs::read_to_string(dir.path().join("report.md")).unwrap();
        assert!(report.contains("| 3 | malicious | 30.0 | -5.5 |"));
    }

    #[test]
    fn broken_template_is_reported() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("bad.csc");
        fs::write(&src, "{{#each motes}}").unwrap();
        let err = render_file(&engine(), &src, &dir.path().join("out.csc"), &json!({})).unwrap_err();
        assert_eq!(err.class(), "TemplateError");
    }

    #[test]
    fn first_letter_is_capitalized() {
        assert_eq!(capitalize("wismote"), "Wismote");
        assert_eq!(capitalize(""), "");
    }
}

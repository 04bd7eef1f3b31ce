use std::fs;
use std::path::Path;

use log::warn;

use crate::config::Settings;
use crate::error::CommandError;
use crate::experiment::blocks::BUILDING_BLOCKS_FILE;
use crate::experiment::structure::load_commented_json;
use crate::models::value::{Kwargs, Value};

pub const MIN_DIST_BETWEEN_MOTES: f64 = 20.0;
pub const MAX_DIST_BETWEEN_MOTES: f64 = 50.0;
pub const WSN_GEN_ALGORITHMS: [&str; 2] = ["quadrants", "grid"];

/// Values the parameters are checked against. `None` lists are not checked.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub platforms: Option<Vec<String>>,
    pub root_types: Option<Vec<String>>,
    pub sensor_types: Option<Vec<String>>,
    pub malicious_types: Option<Vec<String>>,
    pub building_blocks: Option<Vec<String>>,
}

fn list_dir(path: &Path, keep: impl Fn(&Path) -> Option<String>) -> Option<Vec<String>> {
    let entries = fs::read_dir(path).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|e| keep(&e.path()))
        .collect();
    names.sort();
    Some(names)
}

fn mote_types(settings: &Settings, kind: &str) -> Option<Vec<String>> {
    let prefix = format!("{}-", kind);
    list_dir(&settings.experiment_templates().join("motes"), |p| {
        let name = p.file_name()?.to_str()?;
        let stem = name.strip_suffix(".c")?;
        stem.strip_prefix(&prefix).map(str::to_string)
    })
}

impl Catalog {
    pub fn scan(settings: &Settings) -> Self {
        let platforms = list_dir(&settings.contiki_folder.join("platform"), |p| {
            p.is_dir()
                .then(|| p.file_name()?.to_str().map(str::to_string))
                .flatten()
        });
        let building_blocks = load_commented_json(&settings.templates_folder.join(BUILDING_BLOCKS_FILE))
            .ok()
            .and_then(|v| v.as_object().map(|o| o.keys().cloned().collect()));
        Catalog {
            platforms,
            root_types: mote_types(settings, "root"),
            sensor_types: mote_types(settings, "sensor"),
            malicious_types: mote_types(settings, "malicious"),
            building_blocks,
        }
    }
}

fn listed(list: &Option<Vec<String>>, value: &str) -> bool {
    list.as_ref().map_or(true, |l| l.iter().any(|v| v == value))
}

/// Looks parameters up in a campaign section first, then among flat keyword arguments.
struct Lookup<'a> {
    kwargs: &'a Kwargs,
    silent: bool,
}

impl<'a> Lookup<'a> {
    fn get(&self, section: &str, key: &str) -> Option<&'a Value> {
        self.kwargs
            .get(section)
            .and_then(Value::as_map)
            .and_then(|s| s.get(key))
            .or_else(|| self.kwargs.get(key))
            .or_else(|| self.kwargs.get(&key.replace('-', "_")))
            .filter(|v| !v.is_none())
    }

    fn check<T>(
        &self,
        section: &str,
        key: &str,
        default: T,
        reason: &str,
        parse: impl Fn(&Value) -> Option<T>,
    ) -> T
    where
        T: std::fmt::Debug,
    {
        match self.get(section, key) {
            None => default,
            Some(value) => match parse(value) {
                Some(parsed) => parsed,
                None => {
                    if !self.silent {
                        warn!(
                            "Parameter [{} -> {}] {} (set to default: {:?})",
                            section, key, reason, default
                        );
                    }
                    default
                }
            },
        }
    }
}

fn string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn positive_int(value: &Value) -> Option<i64> {
    value.as_int().filter(|v| *v > 0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    pub campaign: Option<String>,
    pub debug: bool,
    pub title: String,
    pub goal: String,
    pub notes: String,
    pub duration: i64,
    pub n: i64,
    pub repeat: i64,
    pub target: String,
    pub malicious_target: String,
    pub mtype_root: String,
    pub mtype_sensor: String,
    pub mtype_malicious: String,
    pub blocks: Vec<String>,
    pub ext_lib: Option<String>,
    pub wsn_gen_algo: String,
    pub min_range: f64,
    pub tx_range: f64,
    pub int_range: f64,
    pub area_side: f64,
    pub max_range: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        SimulationParams {
            campaign: None,
            debug: true,
            title: "Default title".to_string(),
            goal: String::new(),
            notes: String::new(),
            duration: 600,
            n: 10,
            repeat: 1,
            target: "z1".to_string(),
            malicious_target: "z1".to_string(),
            mtype_root: "root-dummy".to_string(),
            mtype_sensor: "sensor-dummy".to_string(),
            mtype_malicious: "malicious-sensor".to_string(),
            blocks: vec![],
            ext_lib: None,
            wsn_gen_algo: "quadrants".to_string(),
            min_range: MIN_DIST_BETWEEN_MOTES,
            tx_range: MAX_DIST_BETWEEN_MOTES,
            int_range: 2.0 * MAX_DIST_BETWEEN_MOTES,
            area_side: 200.0,
            max_range: 200.0,
        }
    }
}

impl SimulationParams {
    /// Builds the parameter set, replacing invalid values by their defaults with a warning.
    pub fn validate(kwargs: &Kwargs, catalog: &Catalog) -> Self {
        let lookup = Lookup {
            kwargs,
            silent: kwargs.get("silent").and_then(Value::as_bool).unwrap_or(false),
        };
        let d = SimulationParams::default();
        let sim = "simulation";
        let mal = "malicious";

        let target = lookup.check(sim, "target", d.target, "is not a valid platform", |v| {
            string(v).filter(|t| listed(&catalog.platforms, t))
        });
        let malicious_target =
            lookup.check(mal, "target", target.clone(), "is not a valid platform", |v| {
                string(v).filter(|t| listed(&catalog.platforms, t))
            });
        let mote_type = |section: &str, key: &str, kind: &str, list: &Option<Vec<String>>, default: &str| {
            let name = lookup.check(
                section,
                key,
                default.to_string(),
                &format!("is not an available {} mote type", kind),
                |v| string(v).filter(|t| listed(list, t)),
            );
            format!("{}-{}", kind, name)
        };
        let mtype_root = mote_type(sim, "root", "root", &catalog.root_types, "dummy");
        let mtype_sensor = mote_type(sim, "sensor", "sensor", &catalog.sensor_types, "dummy");
        let mtype_malicious = mote_type(mal, "type", "malicious", &catalog.malicious_types, "sensor");

        let blocks = match lookup.get(mal, "building-blocks").and_then(Value::as_list) {
            None => vec![],
            Some(items) => items
                .iter()
                .filter_map(|b| {
                    let block = b.to_string();
                    if listed(&catalog.building_blocks, &block) {
                        Some(block)
                    } else {
                        if !lookup.silent {
                            warn!("Parameter [{} -> building-blocks] '{}' does not exist (removed)", mal, block);
                        }
                        None
                    }
                })
                .collect(),
        };

        let min_range = lookup.check(
            sim,
            "minimum-distance-from-root",
            d.min_range,
            "is not a number greater than 0",
            |v| v.as_float().filter(|x| *x > 0.0),
        );
        let tx_range = lookup.check(
            sim,
            "transmission-range",
            d.tx_range,
            &format!("is not a number greater than {}", min_range),
            |v| v.as_float().filter(|x| *x > min_range),
        );
        let int_range = lookup.check(
            sim,
            "interference-range",
            2.0 * tx_range,
            &format!("is not a number greater than or equal to {}", tx_range),
            |v| v.as_float().filter(|x| *x >= tx_range),
        );
        let area_side = lookup.check(
            sim,
            "area-square-side",
            d.area_side,
            &format!("is not a number greater or equal to sqrt(2)*{:.0}", min_range),
            |v| v.as_float().filter(|x| *x >= 2f64.sqrt() * min_range),
        );

        SimulationParams {
            campaign: kwargs.get("campaign").and_then(string),
            debug: lookup.check(sim, "debug", d.debug, "is not a boolean", Value::as_bool),
            title: lookup.check(sim, "title", d.title, "is not a string", string),
            goal: lookup.check(sim, "goal", d.goal, "is not a string", string),
            notes: lookup.check(sim, "notes", d.notes, "is not a string", string),
            duration: lookup.check(sim, "duration", d.duration, "is not an integer greater than 0", positive_int),
            n: lookup.check(sim, "number-motes", d.n, "is not an integer greater than 0", positive_int),
            repeat: lookup.check(sim, "repeat", d.repeat, "is not an integer greater than 0", positive_int),
            target,
            malicious_target,
            mtype_root,
            mtype_sensor,
            mtype_malicious,
            blocks,
            ext_lib: lookup.check(mal, "external-library", None, "does not exist", |v| {
                string(v).filter(|p| Path::new(p).exists()).map(Some)
            }),
            wsn_gen_algo: lookup.check(
                sim,
                "wsn-generation-algorithm",
                d.wsn_gen_algo,
                "is not an available WSN generation algorithm",
                |v| string(v).filter(|a| WSN_GEN_ALGORITHMS.contains(&a.as_str())),
            ),
            min_range,
            tx_range,
            int_range,
            max_range: area_side,
            area_side,
        }
    }

    pub fn to_config(&self) -> Kwargs {
        let mut config = Kwargs::new();
        let mut set = |key: &str, value: Value| {
            config.insert(key.to_string(), value);
        };
        set("campaign", self.campaign.clone().map_or(Value::None, Value::Str));
        set("debug", self.debug.into());
        set("title", self.title.as_str().into());
        set("goal", self.goal.as_str().into());
        set("notes", self.notes.as_str().into());
        set("duration", self.duration.into());
        set("n", self.n.into());
        set("repeat", self.repeat.into());
        set("target", self.target.as_str().into());
        set("malicious_target", self.malicious_target.as_str().into());
        set("mtype_root", self.mtype_root.as_str().into());
        set("mtype_sensor", self.mtype_sensor.as_str().into());
        set("mtype_malicious", self.mtype_malicious.as_str().into());
        set(
            "blocks",
            Value::List(self.blocks.iter().map(|b| b.as_str().into()).collect()),
        );
        set("ext_lib", self.ext_lib.clone().map_or(Value::None, Value::Str));
        set("wsn_gen_algo", self.wsn_gen_algo.as_str().into());
        set("min_range", self.min_range.into());
        set("tx_range", self.tx_range.into());
        set("int_range", self.int_range.into());
        set("area_side", self.area_side.into());
        set("max_range", self.max_range.into());
        config
    }

    /// Reads back a mapping written by [`SimulationParams::to_config`].
    pub fn from_config(config: &Kwargs) -> Result<Self, CommandError> {
        let str_of = |key: &str| -> Result<String, CommandError> {
            config
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| CommandError::InvalidValue(format!("'{}' missing from configuration", key)))
        };
        let int_of = |key: &str, default: i64| config.get(key).and_then(Value::as_int).unwrap_or(default);
        let float_of = |key: &str, default: f64| config.get(key).and_then(Value::as_float).unwrap_or(default);
        let d = SimulationParams::default();
        Ok(SimulationParams {
            campaign: config.get("campaign").and_then(string),
            debug: config.get("debug").and_then(Value::as_bool).unwrap_or(d.debug),
            title: str_of("title").unwrap_or(d.title),
            goal: str_of("goal").unwrap_or(d.goal),
            notes: str_of("notes").unwrap_or(d.notes),
            duration: int_of("duration", d.duration),
            n: int_of("n", d.n),
            repeat: int_of("repeat", d.repeat),
            target: str_of("target")?,
            malicious_target: str_of("malicious_target")?,
            mtype_root: str_of("mtype_root")?,
            mtype_sensor: str_of("mtype_sensor")?,
            mtype_malicious: str_of("mtype_malicious")?,
            blocks: config
                .get("blocks")
                .and_then(Value::as_list)
                .map(|l| l.iter().map(|b| b.to_string()).collect())
                .unwrap_or_default(),
            ext_lib: config.get("ext_lib").and_then(string),
            wsn_gen_algo: str_of("wsn_gen_algo").unwrap_or(d.wsn_gen_algo),
            min_range: float_of("min_range", d.min_range),
            tx_range: float_of("tx_range", d.tx_range),
            int_range: float_of("int_range", d.int_range),
            area_side: float_of("area_side", d.area_side),
            max_range: float_of("max_range", d.max_range),
        })
    }
}

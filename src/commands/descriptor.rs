use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::commands::context::{CommandArgs, CommandContext};
use crate::commands::pipeline::Shell;
use crate::config::settings::{expand_home, Settings};
use crate::error::CommandResult;
use crate::logging::CRITICAL;
use crate::models::value::{Kwargs, Value};

pub type CommandFn = Arc<dyn Fn(&CommandArgs, &CommandContext) -> CommandResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorKind {
    Synchronous,
    /// Runs on the worker pool. `nested_children` marks toolchain calls that fork their own subprocesses.
    Pooled { nested_children: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signature {
    pub params: Vec<Param>,
}

impl Signature {
    pub fn required(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    pub fn has(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    pub fn first(&self) -> Option<&'static str> {
        self.params.first().map(|p| p.name)
    }

    /// Binds positional values to parameter names, then keywords, then defaults.
    /// Fails with the parameter name when it receives both a positional and a keyword value.
    pub fn bind(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<CommandArgs, &'static str> {
        let mut named = Kwargs::new();
        for (param, value) in self.params.iter().zip(args) {
            named.insert(param.name.to_string(), value);
        }
        for (key, value) in kwargs {
            if let Some(param) = self.params.iter().find(|p| p.name == key) {
                if named.contains_key(param.name) {
                    return Err(param.name);
                }
            }
            named.insert(key, value);
        }
        for param in &self.params {
            if let Some(default) = &param.default {
                named
                    .entry(param.name.to_string())
                    .or_insert_with(|| default.clone());
            }
        }
        Ok(CommandArgs::new(named))
    }

    pub fn render(&self, name: &str) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match &p.default {
                Some(default) => format!("{}={}", p.name, default.to_literal()),
                None => p.name.to_string(),
            })
            .collect();
        format!("{}({})", name, params.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDir {
    Experiments,
    Templates,
}

impl BaseDir {
    pub fn resolve(self, settings: &Settings) -> &Path {
        match self {
            BaseDir::Experiments => &settings.experiments_folder,
            BaseDir::Templates => &settings.templates_folder,
        }
    }
}

/// Expands one argument into a path below a configured folder.
#[derive(Debug, Clone, PartialEq)]
pub struct Expand {
    pub arg: &'static str,
    pub into: BaseDir,
    pub ext: Option<&'static str>,
    pub new_arg: Option<&'static str>,
}

impl Expand {
    pub fn new(arg: &'static str, into: BaseDir) -> Self {
        Self {
            arg,
            into,
            ext: None,
            new_arg: None,
        }
    }

    pub fn ext(mut self, ext: &'static str) -> Self {
        self.ext = Some(ext);
        self
    }

    pub fn new_arg(mut self, name: &'static str) -> Self {
        self.new_arg = Some(name);
        self
    }

    pub fn expand(&self, settings: &Settings, value: &str) -> PathBuf {
        let mut expanded = expand_home(&self.into.resolve(settings).join(expand_home(Path::new(value))))
            .to_string_lossy()
            .into_owned();
        if let Some(ext) = self.ext {
            let suffix = format!(".{}", ext);
            if !expanded.ends_with(&suffix) {
                expanded.push_str(&suffix);
            }
        }
        PathBuf::from(expanded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn is_fatal(self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }

    pub fn log(self, message: &str) {
        match self {
            Severity::Debug => debug!("{}", message),
            Severity::Info => info!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Error => error!("{}", message),
            Severity::Critical => error!(target: CRITICAL, "{}", message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    MustExist,
    MustNotExist,
}

/// Existence precondition on a path-valued argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Gate {
    pub kind: GateKind,
    pub arg: &'static str,
    pub level: Option<Severity>,
    pub message: Option<&'static str>,
    pub confirm: Option<&'static str>,
    /// Boolean parameter deciding whether to ask for confirmation.
    pub ask_param: Option<&'static str>,
}

impl Gate {
    pub fn must_exist(arg: &'static str) -> Self {
        Self::new(GateKind::MustExist, arg)
    }

    pub fn must_not_exist(arg: &'static str) -> Self {
        Self::new(GateKind::MustNotExist, arg)
    }

    fn new(kind: GateKind, arg: &'static str) -> Self {
        Self {
            kind,
            arg,
            level: None,
            message: None,
            confirm: None,
            ask_param: None,
        }
    }

    pub fn log(mut self, level: Severity, message: &'static str) -> Self {
        self.level = Some(level);
        self.message = Some(message);
        self
    }

    pub fn confirm(mut self, ask_param: &'static str, question: &'static str) -> Self {
        self.ask_param = Some(ask_param);
        self.confirm = Some(question);
        self
    }

    pub fn violated(&self, path: &Path) -> bool {
        match self.kind {
            GateKind::MustExist => !path.exists(),
            GateKind::MustNotExist => path.exists(),
        }
    }

    /// Only warning or info gates, and gates on an existing path, ask before going on.
    pub fn asks(&self) -> bool {
        self.confirm.is_some()
            && (matches!(self.level, Some(Severity::Warning | Severity::Info))
                || self.kind == GateKind::MustNotExist)
    }
}

pub enum Autocomplete {
    Static(Vec<&'static str>),
    Lazy(fn(&Shell) -> Vec<String>),
}

impl Autocomplete {
    pub fn candidates(&self, shell: &Shell, text: &str) -> Vec<String> {
        let values = match self {
            Autocomplete::Static(values) => values.iter().map(|v| v.to_string()).collect(),
            Autocomplete::Lazy(source) => source(shell),
        };
        let text = text.trim();
        values.into_iter().filter(|v| v.starts_with(text)).collect()
    }
}

/// Description and parameter texts parsed from a `:param name: text` docstring.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandHelp {
    pub description: String,
    pub params: Vec<(String, String)>,
}

impl CommandHelp {
    pub fn parse(doc: &str) -> Self {
        let mut parts = doc.split(":param ");
        let description = parts.next().unwrap_or_default().trim().to_string();
        let params = parts
            .filter_map(|part| {
                let (name, text) = part.split_once(':')?;
                let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                Some((name.trim().to_string(), text))
            })
            .collect();
        CommandHelp {
            description,
            params,
        }
    }
}

/// Everything the shell needs to know about one command, fixed at registration.
pub struct CommandDescriptor {
    pub name: &'static str,
    raw: CommandFn,
    pub behavior: BehaviorKind,
    pub signature: Signature,
    pub expand: Option<Expand>,
    pub gates: Vec<Gate>,
    pub start_msg: Option<&'static str>,
    pub help: CommandHelp,
    pub examples: Vec<&'static str>,
    pub autocomplete: Option<Autocomplete>,
    pub reexec_on_emptyline: bool,
}

impl CommandDescriptor {
    pub fn new<F>(name: &'static str, raw: F) -> Self
    where
        F: Fn(&CommandArgs, &CommandContext) -> CommandResult + Send + Sync + 'static,
    {
        Self {
            name,
            raw: Arc::new(raw),
            behavior: BehaviorKind::Synchronous,
            signature: Signature::default(),
            expand: None,
            gates: vec![],
            start_msg: None,
            help: CommandHelp::default(),
            examples: vec![],
            autocomplete: None,
            reexec_on_emptyline: false,
        }
    }

    /// The bare implementation, without argument checks or error normalization.
    pub fn raw(&self) -> CommandFn {
        Arc::clone(&self.raw)
    }

    pub fn doc(mut self, doc: &str) -> Self {
        self.help = CommandHelp::parse(doc);
        self
    }

    pub fn param(mut self, name: &'static str) -> Self {
        self.signature.params.push(Param {
            name,
            default: None,
        });
        self
    }

    pub fn param_default(mut self, name: &'static str, default: impl Into<Value>) -> Self {
        self.signature.params.push(Param {
            name,
            default: Some(default.into()),
        });
        self
    }

    pub fn pooled(mut self) -> Self {
        self.behavior = BehaviorKind::Pooled {
            nested_children: false,
        };
        self
    }

    pub fn pooled_nested(mut self) -> Self {
        self.behavior = BehaviorKind::Pooled {
            nested_children: true,
        };
        self
    }

    pub fn expand(mut self, expand: Expand) -> Self {
        self.expand = Some(expand);
        self
    }

    pub fn gate(mut self, gate: Gate) -> Self {
        self.gates.push(gate);
        self
    }

    pub fn start_msg(mut self, msg: &'static str) -> Self {
        self.start_msg = Some(msg);
        self
    }

    pub fn examples(mut self, examples: &[&'static str]) -> Self {
        self.examples = examples.to_vec();
        self
    }

    pub fn autocomplete(mut self, autocomplete: Autocomplete) -> Self {
        self.autocomplete = Some(autocomplete);
        self
    }

    pub fn reexec_on_emptyline(mut self) -> Self {
        self.reexec_on_emptyline = true;
        self
    }

    pub fn is_pooled(&self) -> bool {
        matches!(self.behavior, BehaviorKind::Pooled { .. })
    }

    pub fn usage(&self) -> String {
        self.signature.render(self.name)
    }

    pub fn help_text(&self) -> String {
        let mut out = format!("\n    {}\n", self.help.description);
        if !self.help.params.is_empty() {
            let lines: Vec<String> = self
                .help
                .params
                .iter()
                .map(|(name, text)| {
                    let text = if text.is_empty() { "[no description]" } else { text };
                    format!(" - {}:\t{}", name, text)
                })
                .collect();
            out.push_str(&format!("\nArguments:\n{}\n", lines.join("\n")));
        }
        if !self.examples.is_empty() {
            let lines: Vec<String> = self
                .examples
                .iter()
                .map(|e| format!(" >>> {} {}", self.name, e))
                .collect();
            out.push_str(&format!("\nExamples:\n{}\n", lines.join("\n")));
        }
        out
    }
}

/// Substitutes `{arg}` placeholders with bound argument values.
pub fn render_message(template: &str, args: &CommandArgs) -> String {
    let mut out = template.to_string();
    for (key, value) in args.kwargs() {
        let placeholder = format!("{{{}}}", key);
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &value.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> Signature {
        Signature {
            params: vec![
                Param {
                    name: "name",
                    default: None,
                },
                Param {
                    name: "ask",
                    default: Some(Value::Bool(true)),
                },
            ],
        }
    }

    #[test]
    fn required_count_skips_defaults() {
        assert_eq!(signature().required(), 1);
        assert_eq!(signature().render("make"), "make(name, ask=True)");
    }

    #[test]
    fn bind_fills_defaults_and_keeps_extra_keywords() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("target".to_string(), Value::from("z1"));
        let args = signature().bind(vec![Value::from("E1")], kwargs).unwrap();
        assert_eq!(args.get("name"), Some(&Value::from("E1")));
        assert_eq!(args.get("ask"), Some(&Value::Bool(true)));
        assert_eq!(args.get("target"), Some(&Value::from("z1")));
    }

    #[test]
    fn bind_rejects_duplicate_values() {
        let mut kwargs = Kwargs::new();
        kwargs.insert("name".to_string(), Value::from("E2"));
        assert_eq!(
            signature().bind(vec![Value::from("E1")], kwargs).err(),
            Some("name")
        );
    }

    #[test]
    fn expansion_joins_base_folder_and_forces_extension() {
        let settings = Settings {
            experiments_folder: PathBuf::from("/srv/exp"),
            ..Settings::default()
        };
        let expand = Expand::new("exp_file", BaseDir::Experiments).ext("json");
        assert_eq!(
            expand.expand(&settings, "campaign"),
            PathBuf::from("/srv/exp/campaign.json")
        );
        assert_eq!(
            expand.expand(&settings, "/tmp/other.json"),
            PathBuf::from("/tmp/other.json")
        );
    }

    #[test]
    fn docstring_is_split_into_description_and_params() {
        let help = CommandHelp::parse(
            "Make a new experiment.\n\n    :param name: experiment name\n      (or path)\n    :param ask: ask confirmation\n",
        );
        assert_eq!(help.description, "Make a new experiment.");
        assert_eq!(
            help.params,
            vec![
                ("name".to_string(), "experiment name (or path)".to_string()),
                ("ask".to_string(), "ask confirmation".to_string()),
            ]
        );
    }

    #[test]
    fn help_text_lists_examples_with_command_name() {
        let descriptor = CommandDescriptor::new("make", |_, _| Ok(None))
            .doc("Make a new experiment.\n:param name: experiment name")
            .param("name")
            .examples(&["my-simulation"]);
        let text = descriptor.help_text();
        assert!(text.contains("Arguments:\n - name:\texperiment name"));
        assert!(text.contains(" >>> make my-simulation"));
    }

    #[test]
    fn messages_substitute_argument_values() {
        let args = signature().bind(vec![Value::from("E1")], Kwargs::new()).unwrap();
        assert_eq!(
            render_message(" > Experiment '{name}' already exists !", &args),
            " > Experiment 'E1' already exists !"
        );
    }
}

//! Renders the simulation script from the form.
//!
//! Templates use a small mustache subset: `{{name}}` substitutes a value,
//! `{{#flag}}...{{/flag}}` keeps its body when the flag is set and
//! `{{^flag}}...{{/flag}}` when it is not.

use crate::config::FormConfig;
use crate::errors::TemplateError;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Flag(bool),
}

/// Values a template can refer to.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: HashMap<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), Value::Text(value.to_string()));
        self
    }

    pub fn flag(mut self, key: &str, value: bool) -> Self {
        self.values.insert(key.to_string(), Value::Flag(value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    fn flag_value(&self, key: &str) -> Result<bool, TemplateError> {
        match self.get(key) {
            Some(Value::Flag(b)) => Ok(*b),
            Some(Value::Text(_)) => Err(TemplateError::NotAFlag(key.to_string())),
            None => Err(TemplateError::UnknownKey(key.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Var(String),
    Section {
        name: String,
        inverted: bool,
        body: Vec<Node>,
    },
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct ScriptTemplate {
    nodes: Vec<Node>,
}

impl ScriptTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        // Each open section keeps its name, kind and the nodes around it.
        let mut stack: Vec<(String, bool, Vec<Node>)> = Vec::new();
        let mut nodes = Vec::new();
        let mut pos = 0;

        while let Some(offset) = source[pos..].find("{{") {
            let open = pos + offset;
            if open > pos {
                nodes.push(Node::Text(source[pos..open].to_string()));
            }
            let close = source[open + 2..]
                .find("}}")
                .map(|i| open + 2 + i)
                .ok_or(TemplateError::UnclosedTag(open))?;
            let tag = source[open + 2..close].trim();
            pos = close + 2;

            if let Some(name) = tag.strip_prefix('#') {
                stack.push((name.trim().to_string(), false, std::mem::take(&mut nodes)));
            } else if let Some(name) = tag.strip_prefix('^') {
                stack.push((name.trim().to_string(), true, std::mem::take(&mut nodes)));
            } else if let Some(name) = tag.strip_prefix('/') {
                let name = name.trim();
                let (open_name, inverted, outer) = stack.pop().ok_or_else(|| {
                    TemplateError::MismatchedSection {
                        expected: String::new(),
                        found: name.to_string(),
                    }
                })?;
                if open_name != name {
                    return Err(TemplateError::MismatchedSection {
                        expected: open_name,
                        found: name.to_string(),
                    });
                }
                let body = std::mem::replace(&mut nodes, outer);
                nodes.push(Node::Section {
                    name: open_name,
                    inverted,
                    body,
                });
            } else {
                nodes.push(Node::Var(tag.to_string()));
            }
        }

        if let Some((name, _, _)) = stack.pop() {
            return Err(TemplateError::UnclosedSection(name));
        }
        if pos < source.len() {
            nodes.push(Node::Text(source[pos..].to_string()));
        }
        Ok(Self { nodes })
    }

    pub fn render(&self, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let mut out = String::new();
        render_nodes(&self.nodes, ctx, &mut out)?;
        Ok(out)
    }
}

fn render_nodes(nodes: &[Node], ctx: &TemplateContext, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(key) => match ctx.get(key) {
                Some(Value::Text(text)) => out.push_str(text),
                Some(Value::Flag(b)) => out.push_str(python_bool(*b)),
                None => return Err(TemplateError::UnknownKey(key.clone())),
            },
            Node::Section {
                name,
                inverted,
                body,
            } => {
                if ctx.flag_value(name)? != *inverted {
                    render_nodes(body, ctx, out)?;
                }
            }
        }
    }
    Ok(())
}

fn python_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

/// Single-quoted Python string literal.
pub fn python_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

const OPENMM_SCRIPT: &str = "\
from openmm.app import *
from openmm import *
from openmm.unit import *
from sys import stdout

pdb = PDBFile({{input_file}})
{{#water_active}}forcefield = ForceField('{{protein}}', '{{water}}')
{{/water_active}}{{^water_active}}forcefield = ForceField('{{protein}}')
{{/water_active}}
system = forcefield.createSystem(pdb.topology, nonbondedMethod={{nonbonded_method}},
{{#cutoff_active}}    nonbondedCutoff={{nonbonded_cutoff}},
{{/cutoff_active}}    constraints={{constraints}}, rigidWater={{rigid_water}})
{{#stochastic}}integrator = {{integrator}}({{temperature}}, {{friction}}, {{timestep}})
{{/stochastic}}{{^stochastic}}integrator = {{integrator}}({{timestep}})
{{/stochastic}}
simulation = Simulation(pdb.topology, system, integrator)
simulation.context.setPositions(pdb.positions)
{{#minimize}}
print('Minimizing...')
simulation.minimizeEnergy(maxIterations={{minimize_max_iters}})
{{/minimize}}
{{#dcd_active}}simulation.reporters.append(DCDReporter({{dcd_out}}, {{dcd_freq}}))
{{/dcd_active}}{{#statedata_active}}simulation.reporters.append(StateDataReporter(stdout, {{statedata_freq}}, step=True,
    time=True, potentialEnergy=True, temperature=True))
{{/statedata_active}}
print('Running Production...')
simulation.step({{n_steps}})
print('Done!')

positions = simulation.context.getState(getPositions=True).getPositions()
PDBFile.writeFile(simulation.topology, positions, open('output.pdb', 'w'))
";

/// Context holding every value the built-in script refers to.
pub fn script_context(config: &FormConfig) -> TemplateContext {
    let ff = &config.forcefield;
    let integrator = &config.integrator;
    let system = &config.system;
    let reporters = &config.reporters;
    let simulation = &config.simulation;

    TemplateContext::new()
        .text("input_file", python_string(&path_text(&config.input.file)))
        .text("protein", ff.protein)
        .text("water", ff.water)
        .flag("water_active", ff.water_active())
        .text("integrator", integrator.kind.class_name())
        .flag("stochastic", integrator.stochastic_active())
        .text("timestep", integrator.timestep)
        .text("temperature", integrator.temperature)
        .text("friction", integrator.friction)
        .text("nonbonded_method", system.nonbonded_method.name())
        .flag("cutoff_active", system.nonbonded_cutoff_active())
        .text("nonbonded_cutoff", system.nonbonded_cutoff)
        .text("constraints", system.constraints.name())
        .flag("rigid_water", system.rigid_water)
        .flag("dcd_active", reporters.dcd_active)
        .text("dcd_out", python_string(&reporters.dcd_out))
        .text("dcd_freq", reporters.dcd_freq)
        .flag("statedata_active", reporters.statedata_active)
        .text("statedata_freq", reporters.statedata_freq)
        .flag("minimize", simulation.minimize)
        .text("minimize_max_iters", simulation.minimize_max_iters)
        .text("n_steps", simulation.n_steps)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Render the OpenMM script for `config`.
pub fn render_script(config: &FormConfig) -> anyhow::Result<String> {
    config.validate()?;
    let template = ScriptTemplate::parse(OPENMM_SCRIPT)?;
    Ok(template.render(&script_context(config))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntegratorKind, NonbondedMethod, ProteinForcefield};
    use crate::rewrite::tokenize;
    use std::path::PathBuf;

    fn render(source: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        ScriptTemplate::parse(source)?.render(ctx)
    }

    #[test]
    fn substitutes_values_and_flags() {
        let ctx = TemplateContext::new().text("name", "PME").flag("on", true);
        assert_eq!(render("m={{ name }}, x={{on}}", &ctx).unwrap(), "m=PME, x=True");
    }

    #[test]
    fn sections_follow_flags() {
        let src = "a\n{{#yes}}b\n{{/yes}}{{^yes}}c\n{{/yes}}{{#no}}d\n{{/no}}{{^no}}e\n{{/no}}";
        let ctx = TemplateContext::new().flag("yes", true).flag("no", false);
        assert_eq!(render(src, &ctx).unwrap(), "a\nb\ne\n");
    }

    #[test]
    fn nested_sections() {
        let src = "{{#a}}[{{#b}}{{v}}{{/b}}]{{/a}}";
        let ctx = TemplateContext::new().flag("a", true).flag("b", true).text("v", 1);
        assert_eq!(render(src, &ctx).unwrap(), "[1]");
        let ctx = ctx.flag("b", false);
        assert_eq!(render(src, &ctx).unwrap(), "[]");
    }

    #[test]
    fn skipped_sections_do_not_need_their_values() {
        let ctx = TemplateContext::new().flag("off", false);
        assert_eq!(render("{{#off}}{{missing}}{{/off}}ok", &ctx).unwrap(), "ok");
    }

    #[test]
    fn malformed_templates() {
        assert_eq!(ScriptTemplate::parse("x {{oops").unwrap_err(), TemplateError::UnclosedTag(2));
        assert_eq!(
            ScriptTemplate::parse("{{#a}}body").unwrap_err(),
            TemplateError::UnclosedSection("a".into())
        );
        assert_eq!(
            ScriptTemplate::parse("{{#a}}{{/b}}").unwrap_err(),
            TemplateError::MismatchedSection {
                expected: "a".into(),
                found: "b".into()
            }
        );
    }

    #[test]
    fn missing_and_mistyped_keys() {
        let ctx = TemplateContext::new().text("t", "x");
        assert_eq!(render("{{nope}}", &ctx), Err(TemplateError::UnknownKey("nope".into())));
        assert_eq!(render("{{#t}}{{/t}}", &ctx), Err(TemplateError::NotAFlag("t".into())));
    }

    #[test]
    fn python_string_escapes() {
        assert_eq!(python_string("a.pdb"), "'a.pdb'");
        assert_eq!(python_string(r"C:\it's.pdb"), r"'C:\\it\'s.pdb'");
    }

    fn config() -> FormConfig {
        let mut config = FormConfig::default();
        config.input.file = PathBuf::from("input.pdb");
        config
    }

    #[test]
    fn default_script() {
        let script = render_script(&config()).unwrap();
        assert!(script.contains("pdb = PDBFile('input.pdb')\n"));
        assert!(script.contains("forcefield = ForceField('amber99sb.xml', 'tip3p.xml')\n"));
        assert!(script.contains("nonbondedMethod=PME,\n    nonbondedCutoff=1.0*nanometer,\n"));
        assert!(script.contains("constraints=None, rigidWater=True)"));
        assert!(script.contains(
            "integrator = LangevinIntegrator(300.0*kelvin, 91.0/picosecond, 2.0*femtosecond)\n"
        ));
        assert!(script.contains("simulation.minimizeEnergy(maxIterations=100)"));
        assert!(script.contains("DCDReporter('output.dcd', 100)"));
        assert!(script.contains("StateDataReporter(stdout, 100, step=True,"));
        assert!(script.contains("simulation.step(1000)"));
        assert!(!script.contains("{{"));
    }

    #[test]
    fn inactive_options_are_left_out() {
        let mut config = config();
        config.forcefield.protein = ProteinForcefield::Amber96Obc;
        config.integrator.kind = IntegratorKind::Verlet;
        config.system.nonbonded_method = NonbondedMethod::NoCutoff;
        config.simulation.minimize = false;
        config.reporters.dcd_active = false;
        config.reporters.statedata_active = false;

        let script = render_script(&config).unwrap();
        assert!(script.contains("forcefield = ForceField('amber96_obc.xml')\n"));
        assert!(script.contains("integrator = VerletIntegrator(2.0*femtosecond)\n"));
        assert!(!script.contains("nonbondedCutoff"));
        assert!(!script.contains("minimizeEnergy"));
        assert!(!script.contains("DCDReporter"));
        assert!(!script.contains("StateDataReporter"));
    }

    #[test]
    fn rendered_script_tokenizes() {
        let script = render_script(&config()).unwrap();
        assert!(tokenize(&script).is_ok());
    }

    #[test]
    fn invalid_form_is_not_rendered() {
        let mut config = config();
        config.reporters.dcd_out = "trajectory".into();
        assert!(render_script(&config).is_err());
    }
}

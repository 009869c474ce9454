//! Template rendering for role context blocks and the work-mode banner.

use minijinja::{Environment, context};
use serde::Serialize;

use crate::address::Address;
use crate::beads::StepInfo;

const MAYOR: &str = include_str!("templates/mayor.md.jinja");
const DEACON: &str = include_str!("templates/deacon.md.jinja");
const WITNESS: &str = include_str!("templates/witness.md.jinja");
const REFINERY: &str = include_str!("templates/refinery.md.jinja");
const POLECAT: &str = include_str!("templates/polecat.md.jinja");
const CREW: &str = include_str!("templates/crew.md.jinja");
const DOG: &str = include_str!("templates/dog.md.jinja");
const WORK_MODE: &str = include_str!("templates/work_mode.md.jinja");

fn environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    for (name, source) in [
        ("mayor", MAYOR),
        ("deacon", DEACON),
        ("witness", WITNESS),
        ("refinery", REFINERY),
        ("polecat", POLECAT),
        ("crew", CREW),
        ("dog", DOG),
        ("work_mode", WORK_MODE),
    ] {
        env.add_template(name, source)?;
    }
    Ok(env)
}

/// The role-specific context block printed by prime. `hooked` suppresses
/// the generic check-mail-first directive: the hook wins.
pub fn render_role(address: &Address, town: &str, hooked: bool) -> anyhow::Result<String> {
    let env = environment()?;
    let template = env.get_template(address.role())?;
    let (rig, name) = match address {
        Address::Witness { rig } | Address::Refinery { rig } => (rig.as_str(), ""),
        Address::Polecat { rig, name } | Address::Crew { rig, name } => {
            (rig.as_str(), name.as_str())
        }
        Address::Dog { name } => ("", name.as_str()),
        Address::Mayor | Address::Deacon => ("", ""),
    };
    Ok(template.render(context! { town, rig, name, hooked })?)
}

#[derive(Debug, Serialize)]
struct StepView {
    id: String,
    title: String,
    description: String,
}

/// The AUTONOMOUS WORK MODE block, with the molecule's next step when one
/// is attached.
pub fn render_work_mode(
    bead: &str,
    title: &str,
    step: Option<&StepInfo>,
) -> anyhow::Result<String> {
    let env = environment()?;
    let template = env.get_template("work_mode")?;
    let step_view = step.map(|s| StepView {
        id: s.step_id.clone(),
        title: s.title.clone(),
        description: s.description.clone(),
    });
    Ok(template.render(context! {
        bead,
        title,
        step => step_view,
        molecule => step.map(|s| s.molecule_id.clone()),
        done => step.map(|s| s.done),
        total => step.map(|s| s.total),
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_role_renders() {
        let addresses: Vec<Address> = vec![
            "mayor".parse().unwrap(),
            "deacon".parse().unwrap(),
            "wyvern/witness".parse().unwrap(),
            "wyvern/refinery".parse().unwrap(),
            "wyvern/polecats/toast".parse().unwrap(),
            "wyvern/crew/dana".parse().unwrap(),
            "deacon/dogs/rex".parse().unwrap(),
        ];
        for address in addresses {
            let out = render_role(&address, "gastown", false).unwrap();
            assert!(!out.is_empty(), "empty render for {address}");
        }
    }

    #[test]
    fn polecat_block_names_the_branch() {
        let address: Address = "wyvern/polecats/toast".parse().unwrap();
        let out = render_role(&address, "gastown", false).unwrap();
        assert!(out.contains("polecat/toast"));
        assert!(out.contains("POLECAT_DONE toast"));
    }

    #[test]
    fn hook_suppresses_mail_first_directive() {
        let address: Address = "mayor".parse().unwrap();
        let without_hook = render_role(&address, "gastown", false).unwrap();
        assert!(without_hook.contains("Check `gt mail inbox` first"));

        let with_hook = render_role(&address, "gastown", true).unwrap();
        assert!(!with_hook.contains("Check `gt mail inbox` first"));
        assert!(with_hook.contains("it wins over mail"));
    }

    #[test]
    fn work_mode_without_step() {
        let out = render_work_mode("gt-u1", "fix the parser", None).unwrap();
        assert!(out.contains("AUTONOMOUS WORK MODE"));
        assert!(out.contains("gt-u1"));
        assert!(out.contains("bd show gt-u1"));
        assert!(!out.contains("EXECUTE THIS STEP NOW"));
    }

    #[test]
    fn work_mode_with_step() {
        let step = StepInfo {
            molecule_id: "gt-mol1".into(),
            step_id: "gt-mol1.3".into(),
            title: "wire up the parser".into(),
            description: "see the design notes".into(),
            done: 2,
            total: 5,
        };
        let out = render_work_mode("gt-u1", "fix the parser", Some(&step)).unwrap();
        assert!(out.contains("gt-mol1"));
        assert!(out.contains("2/5"));
        assert!(out.contains("gt-mol1.3"));
        assert!(out.contains("EXECUTE THIS STEP NOW"));
        assert!(out.contains("bd close gt-mol1.3"));
    }
}

use crate::{
    error::ConfigError,
    framework::{ChannelId, Fabric, Handle},
    params::LatencyModel,
};

use super::{check_fan, Arbiter, Assign, WidthMode};

/// Binary tree of 2:1 [`Arbiter`]s reducing `NB_REQUESTS` groups of
/// `NB_CHAN` bank channels to a single group.
///
/// At level `l`, node `ii` arbitrates nodes `2 ii` (high) and `2 ii + 1`
/// (low) of the previous level on every bank in lockstep. A node without a
/// sibling is passed to the next level unchanged.
pub struct ArbiterTree {
    /// Arbiters by level, leaves first.
    pub levels: Vec<Vec<Handle<Arbiter>>>,
    /// Wiring of a single leaf straight to the output.
    pub bypass: Vec<Handle<Assign>>,
}

impl ArbiterTree {
    pub fn build(
        fabric: &mut Fabric,
        name: &str,
        leaves: Vec<Vec<ChannelId>>,
        outputs: Vec<ChannelId>,
        mode: WidthMode,
        latency: LatencyModel,
    ) -> Result<Self, ConfigError> {
        let nb_chan = outputs.len();
        check_fan(name, !leaves.is_empty(), "no request group")?;
        check_fan(
            name,
            leaves.iter().all(|l| l.len() == nb_chan),
            format!("every request group must have {nb_chan} channels"),
        )?;
        latency.require_fixed(name)?;

        let mut tree = Self {
            levels: vec![],
            bypass: vec![],
        };
        if leaves.len() == 1 {
            for (b, (&i, &o)) in leaves[0].iter().zip(&outputs).enumerate() {
                let asg = Assign::new(fabric, format!("{name}.bypass[{b}]"), i, o)?;
                tree.bypass.push(fabric.add(asg)?);
            }
            return Ok(tree);
        }

        let params = *fabric.params(outputs[0]);
        let mut nodes = leaves;
        let mut lvl = 0;
        while nodes.len() > 1 {
            let last = nodes.len() <= 2;
            let mut next = Vec::with_capacity(nodes.len().div_ceil(2));
            let mut arbiters = vec![];
            for ii in 0..nodes.len().div_ceil(2) {
                if 2 * ii + 1 >= nodes.len() {
                    next.push(nodes[2 * ii].clone());
                    continue;
                }
                let out = if last {
                    outputs.clone()
                } else {
                    fabric.channels(&format!("{name}.lvl{lvl}.{ii}"), nb_chan, params)?
                };
                let arb = Arbiter::new(
                    fabric,
                    format!("{name}.arb{lvl}.{ii}"),
                    nodes[2 * ii].clone(),
                    nodes[2 * ii + 1].clone(),
                    out.clone(),
                    latency,
                )?
                .with_modes(mode, mode);
                arbiters.push(fabric.add(arb)?);
                next.push(out);
            }
            tracing::debug!("{}: level {} has {} arbiters", name, lvl, arbiters.len());
            tree.levels.push(arbiters);
            nodes = next;
            lvl += 1;
        }
        Ok(tree)
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bench::{initial_word, Initiator, MemoryBank, Transaction},
        params::{InterconnectCtrl, SizeParams},
    };

    #[test]
    fn test_five_leaves() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let nb_chan = 2;
        let leaves: Vec<Vec<ChannelId>> = (0..5)
            .map(|i| fabric.channels(&format!("leaf{i}"), nb_chan, p).unwrap())
            .collect();
        let out = fabric.channels("out", nb_chan, p).unwrap();
        let tree = ArbiterTree::build(
            &mut fabric,
            "tree",
            leaves.clone(),
            out.clone(),
            WidthMode::Banked,
            LatencyModel::FixedOneCycle,
        )
        .unwrap();
        // 5 -> 3 -> 2 -> 1
        assert_eq!(tree.depth(), 3);
        assert_eq!(tree.levels.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 1, 1]);

        fabric.set_ctrl(InterconnectCtrl {
            low_prio_max_stall: 1,
            ..Default::default()
        });
        for (b, &o) in out.iter().enumerate() {
            fabric
                .add(MemoryBank::new(format!("mem{b}"), o).interleaved(b as u64, nb_chan as u64))
                .unwrap();
        }
        let mut inis = vec![];
        for (i, leaf) in leaves.iter().enumerate() {
            for (b, &c) in leaf.iter().enumerate() {
                let mut ini = Initiator::new(format!("ini{i}.{b}"), c);
                ini.extend((0..4).map(|w| Transaction::read(4 * w)));
                inis.push((b, fabric.add(ini).unwrap()));
            }
        }
        assert!(fabric
            .run_until(200, |f| inis.iter().all(|(_, h)| f.get(*h).is_done()))
            .unwrap());
        for (b, h) in &inis {
            for c in fabric.get(*h).completions() {
                let word = (c.tx.add >> 2) * nb_chan as u64 + *b as u64;
                assert_eq!(c.r_data, vec![initial_word(word)]);
            }
        }
        assert!(fabric.diagnostics().violations().is_empty());
    }

    #[test]
    fn test_single_leaf_is_wired_through() {
        let mut fabric = Fabric::new();
        let p = SizeParams::default();
        let leaf = fabric.channels("leaf", 2, p).unwrap();
        let out = fabric.channels("out", 2, p).unwrap();
        let tree = ArbiterTree::build(&mut fabric, "tree", vec![leaf], out, WidthMode::Wide, LatencyModel::FixedOneCycle)
            .unwrap();
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.bypass.len(), 2);
    }
}

// Whole-cluster runs from description files

use std::io::{BufRead, BufReader, Write};

use hci_sim::{bench::AccessPattern, config::Branch, framework::Severity, Cluster, ClusterConfig};

fn config_path(name: &str) -> String {
    format!("{}/configs/{}", env!("CARGO_MANIFEST_DIR"), name)
}

#[test]
fn test_default_cluster() -> anyhow::Result<()> {
    let config = ClusterConfig::load(config_path("default.toml"))?;
    let mut cluster = Cluster::build(&config)?;
    let report = cluster.run(50_000, None::<std::fs::File>)?;

    assert!(report.passed(), "{}", report.render(false));
    assert!(report.violations.is_empty(), "{}", report.render(false));
    assert_eq!(report.masters.len(), 9);
    let hwpe = report.masters.iter().find(|m| m.name == "hwpe0").unwrap();
    assert_eq!(hwpe.branch, Branch::Hwpe);
    assert_eq!(hwpe.reads + hwpe.writes, 100);
    Ok(())
}

#[test]
fn test_patterned_cluster() -> anyhow::Result<()> {
    let config = ClusterConfig::load(config_path("hwpe.toml"))?;
    assert!(matches!(config.pattern(Branch::Hwpe, 2), AccessPattern::ThreeD { .. }));
    let mut cluster = Cluster::build(&config)?;
    cluster.set_severity(Severity::Fatal);
    let report = cluster.run(50_000, None::<std::fs::File>)?;

    assert!(report.passed(), "{}", report.render(false));
    for m in report.masters.iter().filter(|m| m.branch == Branch::Hwpe) {
        assert_eq!(m.reads + m.writes, 100, "{}", m.name);
    }
    Ok(())
}

#[test]
fn test_seed_changes_stimuli() -> anyhow::Result<()> {
    let mut config = ClusterConfig::load(config_path("default.toml"))?;
    config.sim.n_test = 20;
    let mut first = Cluster::build(&config)?;
    let a = first.run(10_000, None::<std::fs::File>)?;
    let mut again = Cluster::build(&config)?;
    let b = again.run(10_000, None::<std::fs::File>)?;
    assert_eq!(a.cycles, b.cycles);

    config.sim.seed += 1;
    let mut other = Cluster::build(&config)?;
    let c = other.run(10_000, None::<std::fs::File>)?;
    assert!(a.passed() && c.passed());
    Ok(())
}

#[test]
fn test_cycle_limit() -> anyhow::Result<()> {
    let mut config = ClusterConfig::default();
    config.sim.n_test = 50;
    let mut cluster = Cluster::build(&config)?;
    let report = cluster.run(10, None::<std::fs::File>)?;
    assert!(!report.drained);
    assert!(!report.passed());
    assert_eq!(report.cycles, 10);
    assert!(report.masters.iter().any(|m| m.unfinished > 0));
    assert!(report.render(false).contains("FAIL"));
    Ok(())
}

#[test]
fn test_trace_file() -> anyhow::Result<()> {
    let mut config = ClusterConfig::default();
    config.hci.n_core = 2;
    config.sim.n_test = 10;
    let mut cluster = Cluster::build(&config)?;

    let mut file = tempfile::NamedTempFile::new()?;
    let report = cluster.run(1_000, Some(file.as_file_mut()))?;
    file.flush()?;
    assert!(report.passed(), "{}", report.render(false));

    let reader = BufReader::new(file.reopen()?);
    let mut lines = 0;
    let mut bank_grants = 0;
    for line in reader.lines() {
        let record: serde_json::Value = serde_json::from_str(&line?)?;
        assert_eq!(record["cycle"], lines);
        for ch in record["channels"].as_array().unwrap() {
            let name = ch["name"].as_str().unwrap();
            if name.starts_with("bank[") && ch["req"] == true && ch["gnt"] == true {
                bank_grants += 1;
            }
        }
        lines += 1;
    }
    assert_eq!(lines, report.cycles + 1);
    assert_eq!(bank_grants, 20);
    Ok(())
}

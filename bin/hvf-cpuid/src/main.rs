// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Print the CPUID table a guest vCPU would observe.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use cpuid_utils::bits::{EXTENDED_BASE_LEAF, STANDARD_BASE_LEAF};
#[cfg(target_arch = "x86_64")]
use cpuid_utils::host::HostCpu;
use cpuid_utils::{CpuidIdent, CpuidSource, CpuidValues};
use hvf_accel::config::Config;
use hvf_accel::cpuid::{CpuProfile, CpuidVirt, ProfileName};
use slog::{o, Drain};
use strum::IntoEnumIterator;

#[derive(Debug, Parser)]
#[clap(about = "Show the CPUID leaves presented to a guest vCPU")]
struct Opts {
    /// Accelerator configuration file (TOML)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// CPU profile, overriding the configuration
    #[clap(short, long)]
    profile: Option<ProfileName>,

    /// Cores per package, overriding the configuration
    #[clap(long)]
    cores: Option<u8>,

    /// Threads per core, overriding the configuration
    #[clap(long)]
    threads: Option<u8>,

    /// vCPU (and APIC) ID to report for
    #[clap(long, default_value_t = 0)]
    vcpu: u32,

    /// Elide all-zero entries from results
    #[clap(short)]
    zero_elide: bool,

    /// List the built-in CPU profiles and exit
    #[clap(long)]
    list_profiles: bool,
}

fn build_log() -> (slog::Logger, slog_async::AsyncGuard) {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let (drain, guard) = slog_async::Async::new(drain).build_with_guard();
    (slog::Logger::root(drain.fuse(), o!()), guard)
}

fn load_config(opts: &Opts) -> anyhow::Result<Config> {
    let mut config = match opts.config.as_deref() {
        Some(path) => read_config(path)?,
        None => Config::default(),
    };
    if let Some(profile) = opts.profile {
        config.accel.cpu_profile = profile;
    }
    if let Some(cores) = opts.cores {
        config.topology.cores = cores;
    }
    if let Some(threads) = opts.threads {
        config.topology.threads = threads;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Config::from_toml_str(&contents)
        .with_context(|| format!("failed to load {}", path.display()))
}

/// Leaves whose output depends on the subleaf input.
fn has_subleaves(leaf: u32) -> bool {
    matches!(leaf, 0x7 | 0xd)
}

fn collect(
    virt: &CpuidVirt,
    host: &dyn CpuidSource,
    zero_elide: bool,
) -> BTreeMap<CpuidIdent, CpuidValues> {
    let std_max = virt.cpuid(host, STANDARD_BASE_LEAF, 0).eax;
    let ext_max = virt.cpuid(host, EXTENDED_BASE_LEAF, 0).eax;

    let mut idents = Vec::new();
    for leaf in STANDARD_BASE_LEAF..=std_max {
        if has_subleaves(leaf) {
            idents.extend([0, 1].map(|sub| CpuidIdent::subleaf(leaf, sub)));
        } else {
            idents.push(CpuidIdent::leaf(leaf));
        }
    }
    if ext_max >= EXTENDED_BASE_LEAF {
        idents.extend((EXTENDED_BASE_LEAF..=ext_max).map(CpuidIdent::leaf));
    }

    idents
        .into_iter()
        .map(|id| (id, virt.cpuid(host, id.leaf, id.subleaf.unwrap_or(0))))
        .filter(|(_, v)| !(zero_elide && *v == CpuidValues::default()))
        .collect()
}

fn print_text(results: &BTreeMap<CpuidIdent, CpuidValues>) {
    for (ident, v) in results.iter() {
        let header = match ident.subleaf {
            None => format!("eax:{:x}\t\t", ident.leaf),
            Some(sub) => format!("eax:{:x} ecx:{:x}", ident.leaf, sub),
        };
        println!("{} ->\t{:x} {:x} {:x} {:x}", header, v.eax, v.ebx, v.ecx, v.edx);
    }
}

fn profile_line(name: ProfileName) -> String {
    let p = CpuProfile::lookup(name);
    format!(
        "{:<10} {}\tsignature {:#x}\tlevel {:#x}\txlevel {:#x}\t{}",
        name.to_string(),
        String::from_utf8_lossy(&p.vendor.to_bytes()),
        p.signature(),
        p.level,
        p.xlevel,
        p.model_id
    )
}

fn list_profiles() {
    for name in ProfileName::iter() {
        println!("{}", profile_line(name));
    }
}

#[cfg(target_arch = "x86_64")]
fn host_cpu() -> anyhow::Result<HostCpu> {
    Ok(HostCpu)
}

#[cfg(not(target_arch = "x86_64"))]
fn host_cpu() -> anyhow::Result<cpuid_utils::CpuidMap> {
    anyhow::bail!("host CPUID can only be queried on x86-64")
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    if opts.list_profiles {
        list_profiles();
        return Ok(());
    }

    let config = load_config(&opts)?;
    let host = host_cpu()?;

    let (log, _guard) = build_log();
    let virt = CpuidVirt::new(
        CpuProfile::lookup(config.accel.cpu_profile),
        config.topology,
        opts.vcpu,
    );
    slog::info!(log, "virtualizing host cpuid";
        "profile" => %config.accel.cpu_profile,
        "cores" => config.topology.cores,
        "threads" => config.topology.threads,
        "vcpu" => opts.vcpu,
    );

    print_text(&collect(&virt, &host, opts.zero_elide));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpuid_utils::CpuidMap;
    use std::io::Write;

    fn opts(args: &[&str]) -> Opts {
        Opts::parse_from(std::iter::once("hvf-cpuid").chain(args.iter().copied()))
    }

    #[test]
    fn config_file_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[accel]\ncpu_profile = \"core2duo\"\n\n[topology]\ncores = 2\n"
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let config = load_config(&opts(&["--config", path])).unwrap();
        assert_eq!(config.accel.cpu_profile, ProfileName::Core2Duo);
        assert_eq!(config.topology.cores, 2);

        let config =
            load_config(&opts(&["--config", path, "-p", "vmx32", "--threads", "2"]))
                .unwrap();
        assert_eq!(config.accel.cpu_profile, ProfileName::Vmx32);
        assert_eq!(config.topology.logical_count(), 4);
    }

    #[test]
    fn bad_config_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[accel]\nslots = 0\n").unwrap();
        let path = file.path().to_str().unwrap();
        let err = load_config(&opts(&["--config", path])).unwrap_err();
        assert!(err.to_string().starts_with("failed to load"));

        assert!(load_config(&opts(&["--config", "/nonexistent/hvf.toml"]))
            .is_err());
        assert!(load_config(&opts(&["--cores", "0"])).is_err());
    }

    #[test]
    fn collects_profile_leaf_range() {
        let virt = CpuidVirt::new(
            CpuProfile::lookup(ProfileName::Core2Duo),
            Default::default(),
            0,
        );
        let host = CpuidMap::default();
        let table = collect(&virt, &host, false);

        assert_eq!(table[&CpuidIdent::leaf(0)].eax, 10);
        assert!(table.contains_key(&CpuidIdent::subleaf(7, 1)));
        assert!(!table.contains_key(&CpuidIdent::leaf(7)));
        assert!(table.contains_key(&CpuidIdent::leaf(0x8000_0008)));
        assert!(!table.contains_key(&CpuidIdent::leaf(0x8000_0009)));
        assert!(!table.contains_key(&CpuidIdent::leaf(0xb)));

        let elided = collect(&virt, &host, true);
        assert!(elided.len() < table.len());
        assert!(elided.contains_key(&CpuidIdent::leaf(0)));
    }

    #[test]
    fn profile_listing() {
        let line = profile_line(ProfileName::Core2Duo);
        assert!(line.starts_with("core2duo   GenuineIntel\tsignature 0x6fb\t"));
        assert!(line.contains("level 0xa\t"));
        assert!(line.ends_with("T7700  @ 2.40GHz"));
    }
}

pub mod image;
pub mod resolvers;
pub mod signatures;

pub mod scanner {
    pub use modsleuth_scanner::*;
}

pub use image::{Image, ScanConfig, SectionMatch};
use signatures::{Signature, SIGNATURES};

/// Instruction set encodings with a known module data idiom
#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum Arch {
    X64,
    X86,
    PpcBe,
}

/// A resolved module data address and the idiom it was resolved from
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModuleDataMatch {
    pub arch: Arch,
    /// Virtual address for [`Arch::X64`]. For the other architectures this is the address as
    /// embedded in the instruction, without `section_base` applied.
    pub address: u64,
}

/// Scan `data`, mapped at virtual address `section_base`, for every known module data idiom.
///
/// Results are grouped by architecture in [`SIGNATURES`] order, then by match offset.
pub fn find_module_data(data: &[u8], section_base: u64) -> Vec<ModuleDataMatch> {
    find_module_data_with(data, section_base, &[])
}

/// Same as [`find_module_data`] but only scanning for `archs`. An empty slice scans for all of
/// them. Result order does not depend on the order of `archs`.
#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(len = data.len(), section_base = section_base, results)
)]
pub fn find_module_data_with(
    data: &[u8],
    section_base: u64,
    archs: &[Arch],
) -> Vec<ModuleDataMatch> {
    let matches: Vec<_> = SIGNATURES
        .iter()
        .filter(|sig| archs.is_empty() || archs.contains(&sig.arch()))
        .flat_map(|sig| scan_signature(sig, data, section_base))
        .collect();
    tracing::Span::current().record("results", matches.len());
    matches
}

fn scan_signature(sig: &Signature, data: &[u8], section_base: u64) -> Vec<ModuleDataMatch> {
    let arch = sig.arch();
    let matches = sig
        .scan(data, section_base)
        .into_iter()
        .map(|address| ModuleDataMatch { arch, address })
        .collect::<Vec<_>>();
    for m in &matches {
        tracing::debug!(%arch, "module data at {:#x}", m.address);
    }
    matches
}

use anyhow::{Context, Result};
use object::{Object, ObjectSection, SectionKind};

use crate::{find_module_data_with, Arch};

pub struct Section<'data> {
    pub name: String,
    pub address: u64,
    pub kind: SectionKind,
    pub data: &'data [u8],
}

impl<'data> Section<'data> {
    fn new(name: String, address: u64, kind: SectionKind, data: &'data [u8]) -> Self {
        Self {
            name,
            address,
            kind,
            data,
        }
    }
}

/// Sections of an executable as laid out in its file
pub struct Image<'data> {
    /// `None` for raw section dumps
    pub format: Option<object::BinaryFormat>,
    pub architecture: object::Architecture,
    pub sections: Vec<Section<'data>>,
}

/// Which sections and idioms [`Image::scan`] looks at
#[derive(Debug, Default, Clone)]
pub struct ScanConfig {
    /// Section names to scan. When empty, every executable section is scanned.
    pub sections: Vec<String>,
    /// Idioms to scan for. When empty, all of them.
    pub archs: Vec<Arch>,
}
impl ScanConfig {
    fn includes(&self, section: &Section<'_>) -> bool {
        if self.sections.is_empty() {
            section.kind == SectionKind::Text
        } else {
            self.sections.iter().any(|name| *name == section.name)
        }
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectionMatch {
    pub section: String,
    pub arch: Arch,
    pub address: u64,
}

impl<'data> Image<'data> {
    /// Parse an ELF, PE or Mach-O file
    pub fn read(data: &'data [u8]) -> Result<Image<'data>> {
        let object = object::File::parse(data).context("failed to parse object file")?;
        let sections = object
            .sections()
            .map(|s| {
                let name = s.name().context("failed to read section name")?.to_string();
                let data = s
                    .data()
                    .with_context(|| format!("failed to read data of section {name}"))?;
                Ok(Section::new(name, s.address(), s.kind(), data))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Image {
            format: Some(object.format()),
            architecture: object.architecture(),
            sections,
        })
    }
    /// Treat `data` as a single executable section mapped at `base_address`
    pub fn raw(data: &'data [u8], base_address: u64) -> Image<'data> {
        Image {
            format: None,
            architecture: object::Architecture::Unknown,
            sections: vec![Section::new(
                "raw".to_owned(),
                base_address,
                SectionKind::Text,
                data,
            )],
        }
    }
    pub fn get_section_containing(&self, address: u64) -> Option<&Section<'data>> {
        self.sections.iter().find(|section| {
            address >= section.address && address - section.address < section.data.len() as u64
        })
    }
    /// Scan every section selected by `config`, using each section's address as its base
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn scan(&self, config: &ScanConfig) -> Vec<SectionMatch> {
        let mut results = vec![];
        for section in &self.sections {
            if section.data.is_empty() || !config.includes(section) {
                continue;
            }
            let span = tracing::debug_span!(
                "section",
                section = section.name.as_str(),
                address = section.address,
                results = tracing::field::Empty
            )
            .entered();

            let matches = find_module_data_with(section.data, section.address, &config.archs);
            span.record("results", matches.len());

            results.extend(matches.into_iter().map(|m| SectionMatch {
                section: section.name.clone(),
                arch: m.arch,
                address: m.address,
            }));
        }
        results
    }
}

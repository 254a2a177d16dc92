//! Built-in name/description templates.

use crate::config::FormatterPreset;

pub struct PresetTemplates {
    pub name: &'static str,
    pub description: &'static str,
}

const DEFAULT: PresetTemplates = PresetTemplates {
    name: concat!(
        r#"{stream.proxied::istrue["🕵️ "||""]}"#,
        r#"{service.shortName::exists["[{service.shortName}{service.cached::istrue["⚡"||"⏳"]}] "||""]}"#,
        r#"{config.addonName}{stream.library::istrue[" ☁️"||""]}"#,
        r#"\n{stream.resolution::exists["{stream.resolution}"||"Unknown"]}"#,
    ),
    description: concat!(
        r#"{stream.quality::exists["🎥 {stream.quality} "||""]}{stream.encode::exists["🎞️ {stream.encode}"||""]}"#,
        r#"\n{stream.visualTags::exists["📺 {stream.visualTags::join(' | ')} "||""]}{stream.audioTags::exists["🎧 {stream.audioTags::join(' | ')}"||""]}"#,
        r#"\n{stream.size::>0["📦 {stream.size::bytes} "||""]}{stream.duration::>0["⏱️ {stream.duration::time} "||""]}{stream.seeders::>0["👥 {stream.seeders} "||""]}"#,
        r#"{stream.indexer::exists["🔍 {stream.indexer}"||""]}"#,
        r#"\n{stream.languageEmojis::exists["🌎 {stream.languageEmojis::join(' / ')}"||""]}"#,
        r#"\n{stream.filename::exists["📁 {stream.filename}"||""]}"#,
        r#"\n{stream.message::exists["ℹ️ {stream.message}"||""]}"#,
    ),
};

const TORRENTIO: PresetTemplates = PresetTemplates {
    name: concat!(
        r#"{service.shortName::exists["[{service.shortName}{service.cached::istrue["+"||" download"]}] "||""]}"#,
        r#"{config.addonName}\n{stream.resolution::exists["{stream.resolution}"||"Unknown"]}"#,
        r#"{stream.visualTags::exists[" {stream.visualTags::join(' | ')}"||""]}"#,
    ),
    description: concat!(
        r#"{stream.folderName::exists["{stream.folderName}\n"||""]}{stream.filename::exists["{stream.filename}"||""]}"#,
        r#"\n{stream.seeders::exists["👤 {stream.seeders} "||""]}{stream.size::exists["💾 {stream.size::bytes} "||""]}"#,
        r#"{stream.indexer::exists["⚙️ {stream.indexer}"||""]}"#,
        r#"\n{stream.languageEmojis::exists["{stream.languageEmojis::join(' / ')}"||""]}"#,
    ),
};

const MINIMAL: PresetTemplates = PresetTemplates {
    name: r#"{config.addonName} {stream.resolution::exists["{stream.resolution}"||""]}"#,
    description: concat!(
        r#"{stream.filename}"#,
        r#"{stream.seasonEpisode::exists[" {stream.seasonEpisode::join(' ')}"||""]}"#,
        r#"\n{stream.size::exists["{stream.size::bytes}"||""]}{service.cached::isfalse[" (uncached)"||""]}"#,
    ),
};

#[must_use]
pub fn templates(preset: FormatterPreset) -> &'static PresetTemplates {
    match preset {
        FormatterPreset::Default => &DEFAULT,
        FormatterPreset::Torrentio => &TORRENTIO,
        FormatterPreset::Minimal => &MINIMAL,
    }
}

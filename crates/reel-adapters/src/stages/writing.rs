//! outline → research → script.

use async_trait::async_trait;
use reel_core::{ArtifactDraft, ArtifactKind, StageContext, StageError, StageImplementation};
use serde_json::json;

use super::{begin, read_json, seed, topic};
use crate::payloads::{OutlineDoc, OutlineSection, ResearchNotes};

const SECTIONS: [&str; 4] = ["Hook", "Context", "Deep Dive", "Takeaway"];

fn title_case(s: &str) -> String {
    s.split_whitespace()
     .map(|w| {
         let mut chars = w.chars();
         match chars.next() {
             Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
             None => String::new(),
         }
     })
     .collect::<Vec<_>>()
     .join(" ")
}

pub fn build_outline(topic: &str) -> OutlineDoc {
    let sections = SECTIONS.iter()
                           .map(|h| OutlineSection { heading: h.to_string(),
                                                     summary: match *h {
                                                         "Hook" => format!("Why {topic} matters right now."),
                                                         "Context" => format!("Where {topic} comes from."),
                                                         "Deep Dive" => format!("How {topic} actually works."),
                                                         _ => format!("What to remember about {topic}."),
                                                     } })
                           .collect();
    OutlineDoc { title: title_case(topic), sections }
}

pub fn build_research(topic: &str, seed: u64) -> ResearchNotes {
    let facts = (0..3u64).map(|i| format!("Finding {} on {topic} (ref #{})", i + 1, (seed.rotate_left(i as u32 * 8) % 9000) + 1000))
                         .collect();
    ResearchNotes { topic: topic.to_string(), facts }
}

/// Markdown con un `#` de título y un `##` por sección del outline.
pub fn render_script(outline: &OutlineDoc, research: &ResearchNotes) -> String {
    let mut out = format!("# {}\n", outline.title);
    for (i, section) in outline.sections.iter().enumerate() {
        out.push_str(&format!("\n## {}\n{}\n", section.heading, section.summary));
        if let Some(fact) = research.facts.get(i) {
            out.push_str(&format!("{fact}.\n"));
        }
    }
    out
}

pub struct OutlineStage;

#[async_trait]
impl StageImplementation for OutlineStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        begin(&ctx).await?;
        let outline = build_outline(&topic(&ctx));
        Ok(vec![ArtifactDraft::json("outline.json", ArtifactKind::Outline, &json!(outline))])
    }
}

pub struct ResearchStage;

#[async_trait]
impl StageImplementation for ResearchStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        begin(&ctx).await?;
        let notes = build_research(&topic(&ctx), seed(&ctx.slug, &ctx.stage));
        Ok(vec![ArtifactDraft::json("research.json", ArtifactKind::Research, &json!(notes))])
    }
}

pub struct ScriptStage;

#[async_trait]
impl StageImplementation for ScriptStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        begin(&ctx).await?;
        let outline: OutlineDoc = read_json(&ctx, "outline")?;
        let research: ResearchNotes = read_json(&ctx, "research")?;
        let script = render_script(&outline, &research);
        let words = script.split_whitespace().count();
        Ok(vec![ArtifactDraft::text("script.md", ArtifactKind::Script, script).with_metadata(json!({
                                                                                   "sections": outline.sections.len(),
                                                                                   "words": words,
                                                                               }))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outline_has_four_titled_sections() {
        let o = build_outline("deep sea vents");
        assert_eq!(o.title, "Deep Sea Vents");
        assert_eq!(o.sections.len(), 4);
        assert!(o.sections[2].summary.contains("deep sea vents"));
    }

    #[test]
    fn script_has_one_heading_per_section() {
        let o = build_outline("tides");
        let r = build_research("tides", 42);
        let md = render_script(&o, &r);
        assert!(md.starts_with("# Tides\n"));
        assert_eq!(md.matches("\n## ").count(), 4);
        assert!(md.contains("## Deep Dive\nHow tides actually works.\nFinding 3 on tides"));
        assert_eq!(md, render_script(&o, &build_research("tides", 42)));
    }
}

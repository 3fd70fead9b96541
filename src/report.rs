//! Markdown report over the descriptions gathered in one run.

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::brain::Model;
use crate::parsers;
use crate::types::InputMessage;

pub const NO_DATA_REPORT: &str = "# Trends Analysis Report\n\nNo trends data collected.";
pub const INSIGHTS_ERROR: &str = "Unable to generate consolidated insights due to an error.";
pub const INSIGHTS_UNAVAILABLE: &str = "Unable to generate consolidated insights at this time.";

const REPORT_TOOL: &str = "Trends Compiler CUA MCP";
const REPORT_CREDIT: &str = "Report generated by Trends Compiler using Computer Use Agent and MCP";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ask the model for a cross-result summary. Never fails; degrades to a
/// placeholder sentence.
pub async fn consolidate_insights(model: &dyn Model, query: &str, analyses: &[String]) -> String {
    let prompt = consolidation_prompt(query, analyses);
    match model.vision(vec![InputMessage::user(prompt)]).await {
        Ok(items) => match parsers::first_text(&items) {
            Some(text) => text.to_string(),
            None => {
                warn!("Consolidation reply carried no text");
                INSIGHTS_UNAVAILABLE.to_string()
            }
        },
        Err(e) => {
            warn!("Error generating consolidated insights: {}", e);
            INSIGHTS_ERROR.to_string()
        }
    }
}

fn consolidation_prompt(query: &str, analyses: &[String]) -> String {
    format!(
        "Based on the following individual image analyses for the query \"{query}\", \
provide a consolidated summary of the key trends, patterns, and insights:\n\n\
{}\n\n\
Please identify:\n\
1. Common themes and patterns\n\
2. Emerging trends\n\
3. Color palettes and design elements\n\
4. Style directions\n\
5. Key recommendations\n\n\
Format your response as clear, actionable insights.",
        analyses.join(" ")
    )
}

/// Render the report. `insights` is only used when there are analyses.
pub fn assemble_report(
    query: &str,
    analyses: &[String],
    insights: &str,
    generated_at: DateTime<Local>,
) -> String {
    if analyses.is_empty() {
        return NO_DATA_REPORT.to_string();
    }
    let stamp = generated_at.format(TIMESTAMP_FORMAT);

    let mut report = format!(
        "# Trends Analysis Report\n\n\
## Search Query: {query}\n\
**Generated on:** {stamp}\n\n\
## Executive Summary\n\
Based on the analysis of {} trending images, here are the key findings:\n\n",
        analyses.len()
    );

    for (idx, analysis) in analyses.iter().enumerate() {
        report.push_str(&format!(
            "## Image {} Analysis\n\n**Detailed Analysis:**\n{}\n\n---\n\n",
            idx + 1,
            analysis
        ));
    }

    report.push_str("## Key Trend Insights\n\n");
    report.push_str(insights);
    report.push_str(&format!(
        "\n\n## Report Metadata\n\
- **Total Images Analyzed:** {}\n\
- **Search Query:** {query}\n\
- **Analysis Date:** {stamp}\n\
- **Tool:** {REPORT_TOOL}\n\n\
---\n\
*{REPORT_CREDIT}*\n",
        analyses.len()
    ));
    report
}

/// Consolidate and render in one go, stamped with the local time.
pub async fn generate_report(model: &dyn Model, query: &str, analyses: &[String]) -> String {
    if analyses.is_empty() {
        return NO_DATA_REPORT.to_string();
    }
    info!("Generating report over {} analyses", analyses.len());
    let insights = consolidate_insights(model, query, analyses).await;
    assemble_report(query, analyses, &insights, Local::now())
}

//! Pure HTML rendering of slides
//!
//! Rendering never fails and has no side effects: the same item and body
//! always produce the same artifact. Every piece of free text and every
//! attribute value is escaped.

use crate::content::{SlideBody, SlideContent, TemplateMarker};
use crate::context::format_amount;
use crate::plan::{ContentType, PlanItem};

/// Attribute marking artifacts produced in place of a failed slide
pub const DEGRADED_MARKER: &str = r#"data-degraded="true""#;

const DISCLAIMER_TEXT: &str = "This deck summarises the listing for reference only. Figures, \
routes, hazard assessments and loan estimates are approximate and may differ from the actual \
conditions. Please confirm all details with the listing agent before making any decision.";

const CLOSING_TEXT: &str = "Thank you. Contact your agent to arrange a private viewing.";

/// Escape text for use in HTML content and double-quoted attributes
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Render a slide
pub fn render(item: &PlanItem, body: &SlideBody) -> String {
    let inner = match body {
        SlideBody::Content(content) => render_content(content),
        SlideBody::Template(marker) => render_template(marker),
    };
    frame(item, "", &inner)
}

/// Render the in-progress preview shown while a slide is being generated
pub fn render_skeleton(item: &PlanItem) -> String {
    frame(
        item,
        r#" data-loading="true""#,
        r#"<p class="slide__placeholder">Generating…</p>"#,
    )
}

/// Render the error-indicating artifact that replaces a failed slide
pub fn render_degraded(item: &PlanItem, reason: &str) -> String {
    let inner = format!(
        r#"<p class="slide__error">This slide could not be generated.</p><p class="slide__reason">{}</p>"#,
        escape_html(reason)
    );
    frame(item, &format!(" {}", DEGRADED_MARKER), &inner)
}

/// Whether an artifact was produced by [`render_degraded`]
pub fn is_degraded(artifact: &str) -> bool {
    artifact.contains(DEGRADED_MARKER)
}

fn frame(item: &PlanItem, extra_attrs: &str, inner: &str) -> String {
    format!(
        r#"<section class="slide slide--{ct}" data-index="{index}" data-content-type="{ct}"{extra}><h2 class="slide__title">{title}</h2><div class="slide__body">{inner}</div></section>"#,
        ct = item.content_type.as_str(),
        index = item.index,
        extra = extra_attrs,
        title = escape_html(&item.title),
        inner = inner,
    )
}

fn render_template(marker: &TemplateMarker) -> String {
    match marker.content_type {
        ContentType::Disclaimer => {
            format!(r#"<p class="disclaimer">{}</p>"#, escape_html(DISCLAIMER_TEXT))
        }
        ContentType::Closing => format!(r#"<p class="closing">{}</p>"#, escape_html(CLOSING_TEXT)),
        _ => r#"<p class="slide__placeholder">Details available on request.</p>"#.to_string(),
    }
}

fn render_content(content: &SlideContent) -> String {
    match content {
        SlideContent::Cover(cover) => format!(
            r#"<h1 class="cover__headline">{}</h1><p class="cover__subheadline">{}</p><p class="cover__price">{}</p><p class="cover__date">{}</p>"#,
            escape_html(&cover.headline),
            escape_html(&cover.subheadline),
            escape_html(&cover.price_label),
            escape_html(&cover.issued_on),
        ),
        SlideContent::PropertyOverview(overview) => {
            let rows: String = overview
                .facts
                .iter()
                .map(|fact| {
                    format!(
                        "<dt>{}</dt><dd>{}</dd>",
                        escape_html(&fact.label),
                        escape_html(&fact.value)
                    )
                })
                .collect();
            format!(r#"<dl class="facts">{}</dl>"#, rows)
        }
        SlideContent::FloorPlan(plan) => format!(
            r#"<figure class="floor-plan">{}<figcaption>{}</figcaption></figure>"#,
            image(&plan.image_url, &plan.caption),
            escape_html(&plan.caption),
        ),
        SlideContent::AccessMap(map) => format!(
            r#"<figure class="access-map">{}<figcaption>{}</figcaption></figure><p class="coords">{:.5}, {:.5}</p>"#,
            image(&map.map_image_url, &map.address),
            escape_html(&map.address),
            map.latitude,
            map.longitude,
        ),
        SlideContent::Transit(transit) => {
            let rows: String = transit
                .routes
                .iter()
                .map(|route| {
                    format!(
                        "<tr><td>{}</td><td>{}</td><td>{} min</td></tr>",
                        escape_html(&route.station),
                        escape_html(&route.line),
                        route.minutes
                    )
                })
                .collect();
            format!(
                r#"<table class="transit"><thead><tr><th>Station</th><th>Line</th><th>Time</th></tr></thead><tbody>{}</tbody></table>"#,
                rows
            )
        }
        SlideContent::NearbyFacilities(facilities) => {
            let rows: String = facilities
                .facilities
                .iter()
                .map(|facility| {
                    format!(
                        r#"<li><span class="facility__name">{}</span> <span class="facility__category">{}</span> <span class="facility__distance">{} m</span></li>"#,
                        escape_html(&facility.name),
                        escape_html(&facility.category),
                        facility.distance_m
                    )
                })
                .collect();
            format!(
                r#"<p class="summary">{}</p><ul class="facilities">{}</ul>"#,
                escape_html(&facilities.summary),
                rows
            )
        }
        SlideContent::HazardRisk(hazard) => {
            let rows: String = hazard
                .risks
                .iter()
                .map(|risk| {
                    format!(
                        r#"<li class="risk risk--{}"><strong>{}</strong> {}</li>"#,
                        risk.level.as_str(),
                        escape_html(&risk.hazard),
                        escape_html(&risk.note)
                    )
                })
                .collect();
            format!(
                r#"<p class="summary">{}</p><ul class="risks">{}</ul>"#,
                escape_html(&hazard.summary),
                rows
            )
        }
        SlideContent::EvacuationShelters(shelters) => {
            let rows: String = shelters
                .shelters
                .iter()
                .map(|shelter| {
                    format!(
                        "<tr><td>{}</td><td>{}</td><td>{} m</td></tr>",
                        escape_html(&shelter.name),
                        escape_html(&shelter.address),
                        shelter.distance_m
                    )
                })
                .collect();
            format!(r#"<table class="shelters"><tbody>{}</tbody></table>"#, rows)
        }
        SlideContent::Neighborhood(neighborhood) => {
            let paragraphs: String = neighborhood
                .paragraphs
                .iter()
                .map(|p| format!("<p>{}</p>", escape_html(p)))
                .collect();
            format!("<h3>{}</h3>{}", escape_html(&neighborhood.heading), paragraphs)
        }
        SlideContent::LoanSimulation(loan) => {
            let currency = escape_html(&loan.currency);
            format!(
                r#"<dl class="loan"><dt>Loan amount</dt><dd>{principal} {c}</dd><dt>Down payment</dt><dd>{down} {c}</dd><dt>Interest rate</dt><dd>{rate:.2}%</dd><dt>Term</dt><dd>{years} years</dd></dl><p class="loan__monthly">{monthly} {c} / month</p>"#,
                principal = format_amount(loan.principal),
                down = format_amount(loan.down_payment),
                rate = loan.annual_rate_pct,
                years = loan.years,
                monthly = format_amount(loan.monthly_payment),
                c = currency,
            )
        }
    }
}

// Only http(s) and inline image data are allowed as image sources
fn image(url: &str, alt: &str) -> String {
    let trimmed = url.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") || lower.starts_with("data:image/")
    {
        format!(
            r#"<img src="{}" alt="{}">"#,
            escape_html(trimmed),
            escape_html(alt)
        )
    } else {
        format!(r#"<p class="slide__missing-image">{}</p>"#, escape_html(alt))
    }
}

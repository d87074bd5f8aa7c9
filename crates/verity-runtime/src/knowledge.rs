//! Immutable domain knowledge snapshot: correction rules, the service
//! catalogue and the team directory.
//!
//! Loaded once at startup (the binary reads it through the `config` crate)
//! and shared behind an `Arc` by the calibrator and the catalogue tools.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DomainKnowledge {
    pub corrections: Vec<CorrectionRule>,
    pub services: Vec<ServiceEntry>,
    pub team: Vec<TeamMember>,
}

/// A known-wrong claim and its correction, triggered by a regex.
#[derive(Debug, Clone, Deserialize)]
pub struct CorrectionRule {
    pub id: String,
    pub pattern: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub price_from: f64,
    pub currency: String,
    /// Billing unit, e.g. `"project"` or `"month"`.
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl ServiceEntry {
    /// One-line price statement used in observations and notes.
    #[must_use]
    pub fn price_line(&self) -> String {
        let unit = self.unit.as_deref().map(|u| format!(" per {u}")).unwrap_or_default();
        format!("{}: from {} {}{unit}", self.name, format_amount(self.price_from), self.currency)
    }

    fn terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamMember {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub specialties: Vec<String>,
    #[serde(default)]
    pub contact: Option<String>,
}

impl TeamMember {
    #[must_use]
    pub fn summary_line(&self) -> String {
        let mut line = format!("{} ({})", self.name, self.role);
        if !self.specialties.is_empty() {
            line.push_str(&format!(", specialties: {}", self.specialties.join(", ")));
        }
        if let Some(contact) = &self.contact {
            line.push_str(&format!(", contact: {contact}"));
        }
        line
    }
}

impl DomainKnowledge {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.corrections.is_empty() && self.services.is_empty() && self.team.is_empty()
    }

    /// Services whose name or an alias appears in `text`, catalogue order.
    #[must_use]
    pub fn services_mentioned(&self, text: &str) -> Vec<&ServiceEntry> {
        let haystack = text.to_lowercase();
        self.services
            .iter()
            .filter(|s| s.terms().any(|term| contains_term(&haystack, term)))
            .collect()
    }

    /// Team members whose name, role or a specialty appears in `text`.
    #[must_use]
    pub fn team_mentioned(&self, text: &str) -> Vec<&TeamMember> {
        let haystack = text.to_lowercase();
        self.team
            .iter()
            .filter(|m| {
                contains_term(&haystack, &m.name)
                    || contains_term(&haystack, &m.role)
                    || m.specialties.iter().any(|s| contains_term(&haystack, s))
            })
            .collect()
    }

    /// Lookup used by the catalogue tool: the query may itself be a name,
    /// alias or id, or merely mention one.
    #[must_use]
    pub fn find_services(&self, query: &str) -> Vec<&ServiceEntry> {
        let needle = query.trim().to_lowercase();
        let exact: Vec<&ServiceEntry> = self
            .services
            .iter()
            .filter(|s| s.id == needle || s.terms().any(|t| t.to_lowercase() == needle))
            .collect();
        if exact.is_empty() { self.services_mentioned(query) } else { exact }
    }

    #[must_use]
    pub fn find_team(&self, query: &str) -> Vec<&TeamMember> {
        let needle = query.trim().to_lowercase();
        let direct: Vec<&TeamMember> = self
            .team
            .iter()
            .filter(|m| {
                m.id == needle
                    || m.name.to_lowercase().contains(&needle)
                    || m.role.to_lowercase().contains(&needle)
                    || m.specialties.iter().any(|s| s.to_lowercase().contains(&needle))
            })
            .collect();
        if direct.is_empty() { self.team_mentioned(query) } else { direct }
    }
}

/// Whole-word containment on an already lowercased haystack.
fn contains_term(haystack: &str, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return false;
    }
    haystack.match_indices(&term).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + term.len()..].chars().next();
        before.is_none_or(|c| !c.is_alphanumeric()) && after.is_none_or(|c| !c.is_alphanumeric())
    })
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 && amount.abs() < 1e15 {
        let digits = format!("{}", amount.abs() as u64);
        let mut grouped = String::new();
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        if amount < 0.0 { format!("-{grouped}") } else { grouped }
    } else {
        format!("{amount:.2}")
    }
}

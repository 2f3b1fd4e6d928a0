//! Extraction prompt for job descriptions.

/// Build the prompt asking the model for the four extraction lists.
pub fn build_prompt(job_description: &str) -> String {
    format!(
        "Analyze the following job description and extract key information.

Return ONLY a valid JSON object with these exact fields:
- mustHave: array of critical required skills and qualifications (be specific)
- niceToHave: array of preferred/optional skills
- keywords: array of important ATS-friendly keywords for resume optimization
- insights: array of observations including red flags, company culture hints, unrealistic expectations, or notable benefits

Be concise, practical, and actionable. No markdown formatting. No explanations outside the JSON.

Job Description:
{job_description}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_names_every_field_and_embeds_document() {
        let prompt = build_prompt("Senior Go Engineer, 5 years, Kubernetes");
        for field in ["mustHave", "niceToHave", "keywords", "insights"] {
            assert!(prompt.contains(field), "missing {field}");
        }
        assert!(prompt.ends_with("Senior Go Engineer, 5 years, Kubernetes"));
    }
}

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{IstEvent, SkillStat, TeacherClassReport};
use crate::skills;

/// Tuning for class reports
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOptions {
    /// Maximum number of entries in `top_skills`
    pub max_skills: usize,
    /// Share of all skill assignments below which a skill counts as a gap
    pub gap_threshold: f64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            max_skills: 10,
            gap_threshold: 0.02,
        }
    }
}

/// Aggregate a course's events into a class report stamped with the current time.
pub fn compute_report(
    events: &[IstEvent],
    course_id: &str,
    options: ReportOptions,
) -> TeacherClassReport {
    compute_report_at(events, course_id, options, Utc::now())
}

/// Same as [`compute_report`] with an explicit `generated_at`.
pub fn compute_report_at(
    events: &[IstEvent],
    course_id: &str,
    options: ReportOptions,
    generated_at: DateTime<Utc>,
) -> TeacherClassReport {
    let course_events: Vec<&IstEvent> = events
        .iter()
        .filter(|event| event.course_id == course_id)
        .collect();
    let total_events = course_events.len();

    let mut frequency: HashMap<String, usize> = HashMap::new();
    let mut events_with_skills = 0usize;

    for event in &course_events {
        let distinct: BTreeSet<String> = event
            .skills
            .entries()
            .iter()
            .filter_map(skills::normalize)
            .collect();

        if distinct.is_empty() {
            continue;
        }
        events_with_skills += 1;
        for skill in distinct {
            *frequency.entry(skill).or_insert(0) += 1;
        }
    }

    let unique_skills_count = frequency.len();
    if unique_skills_count == 0 {
        return TeacherClassReport {
            course_id: course_id.to_string(),
            total_events,
            events_with_skills,
            unique_skills_count: 0,
            top_skills: Vec::new(),
            gaps: Vec::new(),
            generated_at,
        };
    }

    let total_assignments: usize = frequency.values().sum();
    let stats: Vec<SkillStat> = frequency
        .into_iter()
        .map(|(skill, count)| SkillStat {
            skill,
            count,
            share: count as f64 / total_assignments as f64,
        })
        .collect();

    let mut top_skills = stats.clone();
    top_skills.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.skill.cmp(&b.skill)));
    top_skills.truncate(options.max_skills);

    let mut gaps: Vec<SkillStat> = stats
        .into_iter()
        .filter(|stat| stat.share < options.gap_threshold)
        .collect();
    gaps.sort_by(|a, b| {
        a.share
            .partial_cmp(&b.share)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.skill.cmp(&b.skill))
    });

    TeacherClassReport {
        course_id: course_id.to_string(),
        total_events,
        events_with_skills,
        unique_skills_count,
        top_skills,
        gaps,
        generated_at,
    }
}

pub fn render_markdown(report: &TeacherClassReport, options: ReportOptions) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# IST Class Report");
    let _ = writeln!(
        output,
        "Generated for course {} at {}",
        report.course_id,
        report.generated_at.to_rfc3339()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Total events: {}", report.total_events);
    let _ = writeln!(output, "- Events with skills: {}", report.events_with_skills);
    let _ = writeln!(output, "- Unique skills: {}", report.unique_skills_count);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Skills");

    if report.top_skills.is_empty() {
        let _ = writeln!(output, "No skills recorded for this course.");
    } else {
        let _ = writeln!(output, "Share is the percentage of all skill assignments.");
        for stat in report.top_skills.iter() {
            let _ = writeln!(
                output,
                "- {}: {} events ({:.1}%)",
                stat.skill,
                stat.count,
                stat.share * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Gaps (below {:.1}% of assignments)",
        options.gap_threshold * 100.0
    );

    if report.gaps.is_empty() {
        let _ = writeln!(output, "No coverage gaps detected.");
    } else {
        for stat in report.gaps.iter() {
            let _ = writeln!(
                output,
                "- {}: {} events ({:.1}%)",
                stat.skill,
                stat.count,
                stat.share * 100.0
            );
        }
    }

    output
}

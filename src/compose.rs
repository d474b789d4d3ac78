//! Deterministic diary sentence rendering.
//!
//! `compose` and `preview` share one renderer; they differ only in what a
//! missing answer renders as, so a preview of a complete record is exactly
//! the final sentence.

use crate::catalog::{Catalog, ChoiceOption, SubjectMode, Template};
use crate::model::{AnswerRecord, CompanionKind};

/// Stand-in for unanswered fields in the live preview.
pub const PLACEHOLDER: &str = "_____";

const PEOPLE_GLUE: &str = "と、";
const PEOPLE_PARTICLE: &str = "と ";
const VERB_MARKER: &str = "した";
const DID_SUFFIX: &str = "を しました。";
const POLITE_PAST: &str = "ました";
const CHORE_SUFFIX: &str = "を しました";
const FALLBACK_ACTION: &str = "すごしました。";

/// Renders the final sentence for `record`. Total over all field
/// combinations; unmapped labels are rendered as-is.
pub fn compose(record: &AnswerRecord, catalog: &Catalog) -> String {
    render(record, catalog, "")
}

/// Renders the sentence with `PLACEHOLDER` for missing answers.
pub fn preview(record: &AnswerRecord, catalog: &Catalog) -> String {
    render(record, catalog, PLACEHOLDER)
}

fn render(record: &AnswerRecord, catalog: &Catalog, blank: &str) -> String {
    let when = record.when_label().unwrap_or(blank);
    let subject = record.subject.as_deref();
    match subject.and_then(|s| catalog.mode(s).map(|mode| (s, mode))) {
        Some((subject, mode)) => {
            subject_sentence(when, subject, mode, record, blank)
        }
        None => {
            standard_sentence(when, subject.unwrap_or(blank), record, catalog)
        }
    }
}

fn subject_sentence(
    when: &str,
    subject: &str,
    mode: &SubjectMode,
    record: &AnswerRecord,
    blank: &str,
) -> String {
    let detail = record.detail.as_deref();
    let feeling = record.feeling.as_deref();

    let detail_text = detail
        .map(|d| mode.detail(d).map(ChoiceOption::phrase).unwrap_or(d))
        .unwrap_or(blank);
    let mut feeling_text = feeling
        .map(|f| mode.feeling(f).map(ChoiceOption::phrase).unwrap_or(f))
        .unwrap_or("");
    if let (Some(d), Some(f)) = (detail, feeling) {
        if let Some(text) = mode.override_for(d, f) {
            feeling_text = text;
        }
    }

    match mode.template {
        Template::Lesson => format!(
            "{}の {}の じゅぎょうで、{}。 {}",
            when, subject, detail_text, feeling_text
        ),
        Template::Meal => {
            format!("{}の {}は、{}。 {}", when, subject, detail_text, feeling_text)
        }
        Template::Chore => format!(
            "{}、{}の じかんに {}。 {}",
            when,
            subject,
            chore_action(detail_text),
            feeling_text
        ),
        Template::Journey => {
            format!("{}は、{}。 {}", when, detail_text, feeling_text)
        }
    }
}

/// Chore details are noun phrases; give them a verb unless they already
/// end in the polite past.
fn chore_action(detail_text: &str) -> String {
    if detail_text.ends_with(POLITE_PAST) {
        detail_text.to_string()
    } else {
        format!("{}{}", detail_text, CHORE_SUFFIX)
    }
}

fn standard_sentence(
    when: &str,
    subject: &str,
    record: &AnswerRecord,
    catalog: &Catalog,
) -> String {
    let info = catalog.subject(subject);

    let time = info
        .and_then(|s| s.time_phrase.clone())
        .unwrap_or_else(|| format!("{}の じかんに、", subject));

    let people = if record.has_companions() {
        format!("{}{}", record.companions.join(PEOPLE_GLUE), PEOPLE_PARTICLE)
    } else {
        match record.companion_kind {
            Some(kind) if kind != CompanionKind::Alone => {
                format!("{} ", kind.label())
            }
            _ => String::new(),
        }
    };

    let action = match record.detail.as_deref() {
        Some(detail) => standard_action(detail, catalog),
        None => info
            .and_then(|s| s.default_action.clone())
            .unwrap_or_else(|| FALLBACK_ACTION.to_string()),
    };

    let feeling = record
        .feeling
        .as_deref()
        .and_then(|f| catalog.standard_feeling(f))
        .and_then(|o| o.text.as_deref())
        .unwrap_or("");

    format!("{}、{}{}{} {}", when, time, people, action, feeling)
}

fn standard_action(detail: &str, catalog: &Catalog) -> String {
    if let Some(text) = catalog
        .standard_detail(detail)
        .and_then(|o| o.text.as_deref())
    {
        return text.to_string();
    }
    match detail.strip_suffix(VERB_MARKER) {
        Some(stem) => format!("{}{}", stem, DID_SUFFIX),
        None => format!("{}{}", detail, DID_SUFFIX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::When;
    use pretty_assertions::assert_eq;

    fn catalog() -> Catalog {
        Catalog::builtin().unwrap()
    }

    fn subject_record(
        subject: &str,
        detail: &str,
        feeling: &str,
    ) -> AnswerRecord {
        AnswerRecord {
            when: Some(When::Today),
            subject: Some(subject.to_string()),
            detail: Some(detail.to_string()),
            feeling: Some(feeling.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_math_lesson_sentence() {
        let record = subject_record("さんすう", "たしざん", "できた");
        assert_eq!(
            compose(&record, &catalog()),
            "きょうの さんすうの じゅぎょうで、たしざんを しました。 \
             じょうずに できました。うれしかったです。"
        );
    }

    #[test]
    fn test_reading_override() {
        let record = subject_record("こくご", "ほんを よんだ", "できた");
        assert_eq!(
            compose(&record, &catalog()),
            "きょうの こくごの じゅぎょうで、ほんを よみました。 \
             じょうずに よめて、うれしかったです。"
        );

        // Same feeling with another detail keeps the generic phrase.
        let record = subject_record("こくご", "かいた", "できた");
        assert_eq!(
            compose(&record, &catalog()),
            "きょうの こくごの じゅぎょうで、かきました。 \
             できて、うれしかったです。"
        );
    }

    #[test]
    fn test_lunch_sentence() {
        let mut record = subject_record("きゅうしょく", "ぜんぶ たべた", "まんぷく");
        record.when = Some(When::Yesterday);
        assert_eq!(
            compose(&record, &catalog()),
            "きのうの きゅうしょくは、ぜんぶ たべました。 おなかが いっぱいです。"
        );
    }

    #[test]
    fn test_cleaning_sentence_appends_verb() {
        let record = subject_record("そうじ", "ほうき", "がんばった");
        assert_eq!(
            compose(&record, &catalog()),
            "きょう、そうじの じかんに ほうきを しました。 きれいに できました。"
        );
    }

    #[test]
    fn test_chore_action_keeps_conjugated_phrase() {
        assert_eq!(chore_action("ぞうきんを しました"), "ぞうきんを しました");
        assert_eq!(chore_action("ごみ あつめ"), "ごみ あつめを しました");
    }

    #[test]
    fn test_way_home_sentence() {
        let record =
            subject_record("かえりみち", "ともだちと かえった", "たのしかった");
        assert_eq!(
            compose(&record, &catalog()),
            "きょうは、ともだちと かえりました。 たのしく かえりました。"
        );
    }

    #[test]
    fn test_recess_with_companions() {
        let record = AnswerRecord {
            when: Some(When::Today),
            subject: Some("やすみじかん".to_string()),
            detail: Some("おにごっこした".to_string()),
            companions: vec!["Airi".to_string(), "そらくん".to_string()],
            companion_kind: None,
            feeling: Some("たのしかった".to_string()),
        };
        let sentence = compose(&record, &catalog());
        assert_eq!(
            sentence,
            "きょう、やすみじかんに、Airiと、そらくんと おにごっこを しました。 \
             とても たのしかったです。"
        );
        assert!(sentence.find("Airiと").unwrap() < sentence.find("おにごっこ").unwrap());
    }

    #[test]
    fn test_companions_take_precedence_over_kind() {
        let record = AnswerRecord {
            when: Some(When::Today),
            subject: Some("やすみじかん".to_string()),
            detail: Some("ともだちとあそんだ".to_string()),
            companions: vec!["めいちゃん".to_string()],
            companion_kind: Some(CompanionKind::Teacher),
            feeling: Some("おもしろかった".to_string()),
        };
        assert_eq!(
            compose(&record, &catalog()),
            "きょう、やすみじかんに、めいちゃんと あそびました。 \
             とても おもしろかったです。"
        );
    }

    #[test]
    fn test_companion_kind_phrases() {
        let catalog = catalog();
        let mut record = AnswerRecord {
            when: Some(When::Today),
            subject: Some("やすみじかん".to_string()),
            detail: Some("ひとりであそんだ".to_string()),
            companion_kind: Some(CompanionKind::Alone),
            feeling: Some("がんばった".to_string()),
            ..Default::default()
        };
        assert_eq!(
            compose(&record, &catalog),
            "きょう、やすみじかんに、あそびました。 とても がんばりました。"
        );

        record.detail = Some("その他".to_string());
        record.companion_kind = Some(CompanionKind::Everyone);
        assert_eq!(
            compose(&record, &catalog),
            "きょう、やすみじかんに、みんなで その他を しました。 \
             とても がんばりました。"
        );
    }

    #[test]
    fn test_standard_default_actions() {
        let catalog = catalog();
        let record = AnswerRecord {
            when: Some(When::Yesterday),
            subject: Some("やすみじかん".to_string()),
            feeling: Some("むずかしかった".to_string()),
            ..Default::default()
        };
        assert_eq!(
            compose(&record, &catalog),
            "きのう、やすみじかんに、すごしました。 すこし むずかしかったです。"
        );

        let record = AnswerRecord {
            when: Some(When::Today),
            subject: Some("りか".to_string()),
            companion_kind: Some(CompanionKind::Friends),
            ..Default::default()
        };
        assert_eq!(
            compose(&record, &catalog),
            "きょう、りかの じかんに、おともだちと すごしました。 "
        );
    }

    #[test]
    fn test_compose_is_total_on_empty_record() {
        let catalog = catalog();
        assert_eq!(compose(&AnswerRecord::new(), &catalog), "、の じかんに、すごしました。 ");
        assert_eq!(
            preview(&AnswerRecord::new(), &catalog),
            "_____、_____の じかんに、すごしました。 "
        );
    }

    #[test]
    fn test_preview_uses_placeholders() {
        let catalog = catalog();
        let mut record = AnswerRecord {
            when: Some(When::Today),
            subject: Some("そうじ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            preview(&record, &catalog),
            "きょう、そうじの じかんに _____を しました。 "
        );

        record.detail = Some("ぞうきん".to_string());
        record.feeling = Some("つかれた".to_string());
        assert_eq!(preview(&record, &catalog), compose(&record, &catalog));
    }

    #[test]
    fn test_unmapped_labels_fall_back_to_raw() {
        let record = subject_record("おんがく", "ハーモニカ", "ねむかった");
        assert_eq!(
            compose(&record, &catalog()),
            "きょうの おんがくの じゅぎょうで、ハーモニカ。 ねむかった"
        );
    }

    #[test]
    fn test_mapped_labels_never_leak_raw_tokens() {
        let catalog = catalog();
        for (subject, mode) in &catalog.subject_modes {
            for detail in &mode.details {
                for feeling in &mode.feelings {
                    let record =
                        subject_record(subject, &detail.label, &feeling.label);
                    let sentence = compose(&record, &catalog);
                    assert!(sentence.contains(detail.phrase()), "{}", sentence);
                    if !detail.phrase().contains(&detail.label) {
                        assert!(!sentence.contains(&detail.label), "{}", sentence);
                    }
                    if !feeling.phrase().contains(&feeling.label) {
                        assert!(!sentence.contains(&feeling.label), "{}", sentence);
                    }
                }
            }
        }
    }
}

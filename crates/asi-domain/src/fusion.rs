use time::OffsetDateTime;
use uuid::Uuid;

use crate::concept::{ConceptDetails, ExtractedConcept, MasterConcept, Timeline, TimelineEvent};

/// What a merge changed, as far as downstream scheduling cares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeEffect {
	/// The stored description text was replaced. The concept must be
	/// re-vectorized: the caller nulls its embedding.
	pub description_replaced: bool,
}

/// Merge one extracted concept into its active master record.
///
/// Field rules: category, importance and development stage are overwritten
/// (time-sensitive); the longer description wins; metrics are replaced as a
/// whole snapshot; `timeline.established` keeps the original once set while
/// recent events accrue into the event log; relation lists and source
/// sentences grow by ordered set-union, sentences capped at
/// `max_source_sentences` newest. `version` increments on every merge.
pub fn merge_concepts(
	existing: &mut MasterConcept,
	incoming: &ExtractedConcept,
	doc_id: Uuid,
	now: OffsetDateTime,
	max_source_sentences: usize,
) -> MergeEffect {
	let mut effect = MergeEffect::default();

	existing.concept_category = incoming.concept_category;
	existing.importance_score = incoming.importance_score;

	if incoming.development_stage.is_some() {
		existing.development_stage = incoming.development_stage.clone();
	}
	if incoming.metrics.is_some() {
		existing.details.metrics = incoming.metrics.clone();
	}

	merge_timeline(&mut existing.details, incoming.timeline.as_ref(), now);

	if incoming.description.chars().count() > existing.details.description.chars().count() {
		existing.details.description = incoming.description.clone();
		effect.description_replaced = true;
	}

	ordered_union(&mut existing.details.relations.customers, &incoming.relations.customers);
	ordered_union(&mut existing.details.relations.partners, &incoming.relations.partners);
	ordered_union(&mut existing.details.relations.subsidiaries, &incoming.relations.subsidiaries);

	merge_source_sentences(
		&mut existing.details.source_sentences,
		&incoming.source_sentences,
		max_source_sentences,
	);

	existing.last_updated_from_doc_id = Some(doc_id);
	existing.version += 1;
	existing.updated_at = now;

	effect
}

/// Build a fresh master record from a first-seen concept. The embedding is
/// absent until the vectorization pass assigns one.
pub fn create_from_new(
	incoming: &ExtractedConcept,
	company_code: &str,
	doc_id: Uuid,
	now: OffsetDateTime,
	max_source_sentences: usize,
) -> MasterConcept {
	let mut details = ConceptDetails {
		description: incoming.description.clone(),
		timeline: None,
		metrics: incoming.metrics.clone(),
		relations: incoming.relations.clone(),
		source_sentences: Vec::new(),
	};

	merge_timeline(&mut details, incoming.timeline.as_ref(), now);
	merge_source_sentences(
		&mut details.source_sentences,
		&incoming.source_sentences,
		max_source_sentences,
	);

	MasterConcept {
		concept_id: Uuid::new_v4(),
		company_code: company_code.to_string(),
		concept_name: incoming.concept_name.clone(),
		concept_category: incoming.concept_category,
		importance_score: incoming.importance_score,
		development_stage: incoming.development_stage.clone(),
		details,
		last_updated_from_doc_id: Some(doc_id),
		version: 1,
		is_active: true,
		created_at: now,
		updated_at: now,
	}
}

fn merge_timeline(details: &mut ConceptDetails, incoming: Option<&Timeline>, now: OffsetDateTime) {
	let Some(incoming) = incoming else {
		return;
	};
	let timeline = details.timeline.get_or_insert_with(Timeline::default);

	// `established` is a historical fact: only fill it when missing.
	if timeline.established.is_none() {
		timeline.established = incoming.established.clone();
	}
	if let Some(event) = incoming.recent_event.as_ref().filter(|event| !event.trim().is_empty()) {
		timeline.recent_event = Some(event.clone());

		let already_logged = timeline.events.iter().any(|logged| logged.event == *event);

		if !already_logged {
			timeline.events.push(TimelineEvent { date: now.date(), event: event.clone() });
		}
	}
}

fn ordered_union(current: &mut Vec<String>, incoming: &[String]) {
	for entry in incoming {
		if !current.iter().any(|existing| existing == entry) {
			current.push(entry.clone());
		}
	}
}

fn merge_source_sentences(current: &mut Vec<String>, incoming: &[String], cap: usize) {
	ordered_union(current, incoming);

	// Keep the newest `cap` sentences.
	if current.len() > cap {
		current.drain(..current.len() - cap);
	}
}

#[cfg(test)]
mod tests {
	use time::macros::datetime;

	use super::*;
	use crate::concept::{ConceptCategory, Metrics, Relations};

	fn extracted(name: &str, importance: f32, description: &str) -> ExtractedConcept {
		ExtractedConcept {
			concept_name: name.to_string(),
			concept_category: ConceptCategory::Core,
			importance_score: importance,
			development_stage: Some("成熟期".to_string()),
			description: description.to_string(),
			timeline: None,
			metrics: None,
			relations: Relations::default(),
			source_sentences: Vec::new(),
		}
	}

	fn now() -> OffsetDateTime {
		datetime!(2025-06-30 08:00:00 UTC)
	}

	#[test]
	fn new_concept_starts_at_version_one() {
		let incoming = extracted("螺杆空气压缩机", 0.95, "高效节能的螺杆空气压缩机产品线");
		let doc_id = Uuid::new_v4();
		let master = create_from_new(&incoming, "300257", doc_id, now(), 20);

		assert_eq!(master.version, 1);
		assert!(master.is_active);
		assert_eq!(master.company_code, "300257");
		assert_eq!(master.last_updated_from_doc_id, Some(doc_id));
		assert_eq!(master.details.description, incoming.description);
	}

	#[test]
	fn merge_overwrites_time_sensitive_fields_and_bumps_version() {
		let first = extracted("螺杆空气压缩机", 0.95, &"长".repeat(400));
		let mut master = create_from_new(&first, "300257", Uuid::new_v4(), now(), 20);
		let mut second = extracted("螺杆空气压缩机", 0.92, &"短".repeat(200));

		second.concept_category = ConceptCategory::Emerging;
		second.relations.customers = vec!["山东电厂".to_string()];

		let doc_id = Uuid::new_v4();
		let effect = merge_concepts(&mut master, &second, doc_id, now(), 20);

		assert_eq!(master.version, 2);
		assert_eq!(master.importance_score, 0.92);
		assert_eq!(master.concept_category, ConceptCategory::Emerging);
		// The longer original description is retained.
		assert_eq!(master.details.description.chars().count(), 400);
		assert!(!effect.description_replaced);
		assert_eq!(master.details.relations.customers, vec!["山东电厂".to_string()]);
		assert_eq!(master.last_updated_from_doc_id, Some(doc_id));
	}

	#[test]
	fn longer_description_replaces_and_flags_revectorization() {
		let first = extracted("真空泵", 0.6, "短描述");
		let mut master = create_from_new(&first, "300257", Uuid::new_v4(), now(), 20);
		let second = extracted("真空泵", 0.6, "一段明显更长、信息量更大的产品描述文本");
		let effect = merge_concepts(&mut master, &second, Uuid::new_v4(), now(), 20);

		assert!(effect.description_replaced);
		assert_eq!(master.details.description, second.description);
	}

	#[test]
	fn merge_is_idempotent_on_the_same_document_payload() {
		let mut incoming = extracted("磁悬浮鼓风机", 0.6, "磁悬浮鼓风机描述");

		incoming.relations.customers = vec!["客户A".to_string(), "客户B".to_string()];
		incoming.source_sentences = vec!["s1".to_string(), "s2".to_string()];

		let doc_id = Uuid::new_v4();
		let mut master = create_from_new(&incoming, "300257", doc_id, now(), 20);
		let before = master.details.clone();

		merge_concepts(&mut master, &incoming, doc_id, now(), 20);

		let after_once = master.details.clone();

		merge_concepts(&mut master, &incoming, doc_id, now(), 20);

		assert_eq!(before, after_once);
		assert_eq!(master.details, after_once);
		// Only version and bookkeeping move.
		assert_eq!(master.version, 3);
	}

	#[test]
	fn relations_union_deduplicates_preserving_order() {
		let mut first = extracted("工业气体", 0.5, "desc");

		first.relations.partners = vec!["甲".to_string(), "乙".to_string()];

		let mut master = create_from_new(&first, "300257", Uuid::new_v4(), now(), 20);
		let mut second = extracted("工业气体", 0.5, "desc");

		second.relations.partners = vec!["乙".to_string(), "丙".to_string()];

		merge_concepts(&mut master, &second, Uuid::new_v4(), now(), 20);

		assert_eq!(
			master.details.relations.partners,
			vec!["甲".to_string(), "乙".to_string(), "丙".to_string()]
		);
	}

	#[test]
	fn source_sentences_cap_keeps_newest() {
		let mut first = extracted("压缩机配件", 0.5, "desc");

		first.source_sentences = (0..4).map(|i| format!("old-{i}")).collect();

		let mut master = create_from_new(&first, "300257", Uuid::new_v4(), now(), 5);
		let mut second = extracted("压缩机配件", 0.5, "desc");

		second.source_sentences = (0..3).map(|i| format!("new-{i}")).collect();

		merge_concepts(&mut master, &second, Uuid::new_v4(), now(), 5);

		assert_eq!(
			master.details.source_sentences,
			vec!["old-2", "old-3", "new-0", "new-1", "new-2"]
		);
	}

	#[test]
	fn established_is_kept_while_events_accrue() {
		let mut first = extracted("余热回收", 0.5, "desc");

		first.timeline = Some(Timeline {
			established: Some("2010".to_string()),
			recent_event: None,
			events: Vec::new(),
		});

		let mut master = create_from_new(&first, "300257", Uuid::new_v4(), now(), 20);
		let mut second = extracted("余热回收", 0.5, "desc");

		second.timeline = Some(Timeline {
			established: Some("2015".to_string()),
			recent_event: Some("签订海外订单".to_string()),
			events: Vec::new(),
		});

		merge_concepts(&mut master, &second, Uuid::new_v4(), now(), 20);

		let timeline = master.details.timeline.as_ref().expect("timeline");

		assert_eq!(timeline.established.as_deref(), Some("2010"));
		assert_eq!(timeline.events.len(), 1);
		assert_eq!(timeline.events[0].event, "签订海外订单");
		assert_eq!(timeline.events[0].date, now().date());
	}

	#[test]
	fn metrics_are_replaced_as_a_whole() {
		let mut first = extracted("螺杆机", 0.5, "desc");

		first.metrics =
			Some(Metrics { revenue: Some(1e9), market_share: Some(0.3), ..Metrics::default() });

		let mut master = create_from_new(&first, "300257", Uuid::new_v4(), now(), 20);
		let mut second = extracted("螺杆机", 0.5, "desc");

		second.metrics = Some(Metrics { revenue: Some(2e9), ..Metrics::default() });

		merge_concepts(&mut master, &second, Uuid::new_v4(), now(), 20);

		let metrics = master.details.metrics.as_ref().expect("metrics");

		assert_eq!(metrics.revenue, Some(2e9));
		// The old market_share snapshot does not linger.
		assert_eq!(metrics.market_share, None);
	}

	#[test]
	fn disjoint_concepts_commute() {
		let doc_a = extracted("概念甲", 0.4, "甲的描述");
		let doc_b = extracted("概念乙", 0.8, "乙的描述");

		// Fusing a then b vs b then a yields the same per-name end state.
		let a_then = create_from_new(&doc_a, "300257", Uuid::new_v4(), now(), 20);
		let b_then = create_from_new(&doc_b, "300257", Uuid::new_v4(), now(), 20);
		let b_first = create_from_new(&doc_b, "300257", Uuid::new_v4(), now(), 20);
		let a_first = create_from_new(&doc_a, "300257", Uuid::new_v4(), now(), 20);

		assert_eq!(a_then.details, a_first.details);
		assert_eq!(b_then.details, b_first.details);
		assert_eq!(a_then.importance_score, a_first.importance_score);
		assert_eq!(b_then.importance_score, b_first.importance_score);
	}
}

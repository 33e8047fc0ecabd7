pub mod aggregate;
pub mod concept;
pub mod document;
pub mod fusion;
pub mod market;
pub mod scoring;
pub mod text;

pub use self::{
	aggregate::{AggregatedCompany, AggregationStrategy, aggregate_by_company},
	concept::{
		ConceptCategory, ConceptDetails, ExtractedConcept, MasterConcept, Metrics, Relations,
		Timeline, TimelineEvent,
	},
	document::Document,
	fusion::{MergeEffect, create_from_new, merge_concepts},
	market::{
		FilterOutcome, MarketData, MarketFilterPolicy, MarketFilters, ScoredCompany, TierBand,
		apply_filters,
	},
	scoring::{RankingWeights, assign_final_scores},
	text::prepare_text_for_embedding,
};

pub fn render_schema(vector_dim: u32, hnsw_m: u32, hnsw_ef_construction: u32) -> String {
	let init = include_str!("../../../sql/init.sql");
	let expanded = expand_includes(init);

	expanded
		.replace("<VECTOR_DIM>", &vector_dim.to_string())
		.replace("<HNSW_M>", &hnsw_m.to_string())
		.replace("<HNSW_EF_CONSTRUCTION>", &hnsw_ef_construction.to_string())
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"00_extensions.sql" => out.push_str(include_str!("../../../sql/00_extensions.sql")),
				"tables/001_companies.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_companies.sql")),
				"tables/002_source_documents.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_source_documents.sql")),
				"tables/003_business_concepts_master.sql" => out
					.push_str(include_str!("../../../sql/tables/003_business_concepts_master.sql")),
				"tables/004_concept_relations.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_concept_relations.sql")),
				"tables/005_market_data_daily.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_market_data_daily.sql")),
				"tables/006_market_data_current.sql" =>
					out.push_str(include_str!("../../../sql/tables/006_market_data_current.sql")),
				_ => out.push_str(line),
			}
		} else {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}

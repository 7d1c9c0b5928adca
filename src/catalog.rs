//! Catalog metadata provider.
//!
//! [`CatalogProvider`] is the seam the resolver talks to: one search call
//! and two enrichment calls per title. [`TmdbClient`] implements it against
//! The Movie Database v3 API.
//!
//! # Endpoints
//!
//! | Call | Movie | TV |
//! |------|-------|----|
//! | search | `/search/movie?query=&year=` | `/search/tv?query=&first_air_date_year=` |
//! | details | `/movie/{id}?append_to_response=external_ids` | `/tv/{id}?append_to_response=external_ids` |
//! | keywords | `/movie/{id}/keywords` (`keywords[]`) | `/tv/{id}/keywords` (`results[]`) |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use curator_core::models::Medium;

use crate::config::CatalogConfig;
use crate::error::ProviderError;
use crate::http::{build_client, send_with_retry};

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub catalog_id: i64,
    pub title: String,
    pub vote_count: u32,
    pub vote_average: f64,
    pub overview: String,
}

/// Extended details for a catalog entry. Every field may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TitleDetails {
    pub genres: Vec<String>,
    pub runtime_minutes: Option<u32>,
    pub country: Option<String>,
    pub imdb_id: Option<String>,
}

#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Search by title and release year. Results are in catalog relevance
    /// order.
    async fn search(
        &self,
        title: &str,
        year: i32,
        medium: Medium,
    ) -> Result<Vec<SearchHit>, ProviderError>;

    async fn details(&self, catalog_id: i64, medium: Medium)
        -> Result<TitleDetails, ProviderError>;

    async fn keywords(&self, catalog_id: i64, medium: Medium)
        -> Result<Vec<String>, ProviderError>;
}

/// TMDb v3 client. The API key is read from `TMDB_API_KEY`.
pub struct TmdbClient {
    client: Client,
    api_base: String,
    api_key: String,
    language: String,
    max_retries: u32,
}

impl TmdbClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var("TMDB_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ProviderError::MissingCredentials("TMDB_API_KEY"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &CatalogConfig, api_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.timeout_secs))?,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            language: config.language.clone(),
            max_retries: config.max_retries,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", self.api_base, path);
        let response = send_with_retry(
            || {
                self.client
                    .get(&url)
                    .query(&[
                        ("api_key", self.api_key.as_str()),
                        ("language", self.language.as_str()),
                    ])
                    .query(params)
            },
            self.max_retries,
        )
        .await?;

        let body = response.text().await.map_err(ProviderError::Network)?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn path_segment(medium: Medium) -> &'static str {
    match medium {
        Medium::Movie => "movie",
        Medium::Tv => "tv",
    }
}

#[async_trait]
impl CatalogProvider for TmdbClient {
    async fn search(
        &self,
        title: &str,
        year: i32,
        medium: Medium,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        let year_param = match medium {
            Medium::Movie => "year",
            Medium::Tv => "first_air_date_year",
        };
        let mut params = vec![
            ("query", title.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if year > 0 {
            params.push((year_param, year.to_string()));
        }

        let raw: SearchResponse = self
            .get(&format!("/search/{}", path_segment(medium)), &params)
            .await?;
        Ok(raw.into_hits())
    }

    async fn details(
        &self,
        catalog_id: i64,
        medium: Medium,
    ) -> Result<TitleDetails, ProviderError> {
        let raw: DetailsResponse = self
            .get(
                &format!("/{}/{}", path_segment(medium), catalog_id),
                &[("append_to_response", "external_ids".to_string())],
            )
            .await?;
        Ok(raw.into_details(medium))
    }

    async fn keywords(
        &self,
        catalog_id: i64,
        medium: Medium,
    ) -> Result<Vec<String>, ProviderError> {
        let raw: KeywordsResponse = self
            .get(
                &format!("/{}/{}/keywords", path_segment(medium), catalog_id),
                &[],
            )
            .await?;
        Ok(raw.into_names())
    }
}

// ============ Wire types ============

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    vote_count: u32,
    #[serde(default)]
    vote_average: f64,
    #[serde(default)]
    overview: String,
}

impl SearchResponse {
    fn into_hits(self) -> Vec<SearchHit> {
        self.results
            .into_iter()
            .map(|hit| SearchHit {
                catalog_id: hit.id,
                title: hit.title.or(hit.name).unwrap_or_default(),
                vote_count: hit.vote_count,
                vote_average: hit.vote_average,
                overview: hit.overview,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Country {
    iso_3166_1: String,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalIds {
    #[serde(default)]
    imdb_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    genres: Vec<Named>,
    #[serde(default)]
    runtime: Option<u32>,
    #[serde(default)]
    episode_run_time: Vec<u32>,
    #[serde(default)]
    production_countries: Vec<Country>,
    #[serde(default)]
    origin_country: Vec<String>,
    #[serde(default)]
    imdb_id: Option<String>,
    #[serde(default)]
    external_ids: ExternalIds,
}

impl DetailsResponse {
    fn into_details(self, medium: Medium) -> TitleDetails {
        let (runtime, country) = match medium {
            Medium::Movie => (
                self.runtime,
                self.production_countries.into_iter().next().map(|c| c.iso_3166_1),
            ),
            Medium::Tv => (
                self.episode_run_time.first().copied(),
                self.origin_country.into_iter().next(),
            ),
        };
        TitleDetails {
            genres: self.genres.into_iter().map(|g| g.name).collect(),
            runtime_minutes: runtime.filter(|m| *m > 0),
            country: country.filter(|c| !c.is_empty()),
            imdb_id: self
                .external_ids
                .imdb_id
                .or(self.imdb_id)
                .filter(|id| !id.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeywordsResponse {
    #[serde(default)]
    keywords: Vec<Named>,
    #[serde(default)]
    results: Vec<Named>,
}

impl KeywordsResponse {
    fn into_names(self) -> Vec<String> {
        self.keywords
            .into_iter()
            .chain(self.results)
            .map(|k| k.name)
            .collect()
    }
}

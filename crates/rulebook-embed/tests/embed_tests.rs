use mockito::Matcher;
use serde_json::json;

use rulebook_core::config::{EmbeddingSettings, ProviderKind, Settings};
use rulebook_core::error::Error;
use rulebook_core::traits::EmbedProvider;
use rulebook_embed::{get_default_provider, HashingEmbedder, OpenAiEmbedder};

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[tokio::test]
async fn hashing_embedder_shapes_and_determinism() {
    let embedder = HashingEmbedder::new(256);
    let texts = vec!["Ezetimib statin tedavisi".to_string(), "Ezetimib statin tedavisi".to_string()];
    let embs = embedder.embed_batch(&texts).await.expect("embed_batch");
    assert_eq!(embs.len(), 2);
    assert_eq!(embs[0].len(), 256);
    let norm: f32 = embs[0].iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");
    assert_eq!(embs[0], embs[1]);
    assert_eq!(embedder.model_id(), "hashing:xxh64:d256");
}

#[tokio::test]
async fn hashing_embedder_ranks_shared_tokens_higher() {
    let embedder = HashingEmbedder::new(512);
    let query = embedder.embed("İlaç: EZETIMIB | kullanım şartları").await.unwrap();
    let related = embedder.embed("Ezetimib kullanım şartları aşağıdadır").await.unwrap();
    let unrelated = embedder.embed("Warfarin hastalarda INR takibi").await.unwrap();
    assert!(cosine(&query, &related) > cosine(&query, &unrelated));
}

#[test]
fn hashing_provider_selected_from_settings() {
    let mut settings = Settings::default();
    settings.embedding.provider = ProviderKind::Hashing;
    settings.embedding.dimension = 48;
    let provider = get_default_provider(&settings).expect("provider");
    assert_eq!(provider.dim(), 48);
}

#[test]
fn missing_api_key_is_invalid_config() {
    if std::env::var("APP_USE_FAKE_EMBEDDINGS").is_ok() {
        return;
    }
    let mut settings = Settings::default();
    settings.embedding.api_key_env = "RULEBOOK_TEST_KEY_THAT_IS_NOT_SET".to_string();
    assert!(matches!(get_default_provider(&settings), Err(Error::InvalidConfig(_))));
}

fn settings_for(url: &str, dim: usize) -> EmbeddingSettings {
    EmbeddingSettings { base_url: url.to_string(), dimension: dim, model: "test-model".to_string(), ..EmbeddingSettings::default() }
}

#[tokio::test]
async fn openai_batch_preserves_input_order() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/embeddings")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({"model": "test-model", "input": ["a", "b"]})))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]})
            .to_string(),
        )
        .create_async()
        .await;

    let embedder = OpenAiEmbedder::new("sk-test".to_string(), &settings_for(&server.url(), 2)).unwrap();
    let out = embedder.embed_batch(&["a".to_string(), "b".to_string()]).await.unwrap();
    assert_eq!(out, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    assert_eq!(embedder.model_id(), "openai:test-model:d2");
    mock.assert_async().await;
}

#[tokio::test]
async fn openai_payload_too_large_is_batch_unavailable() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server.mock("POST", "/v1/embeddings").with_status(413).create_async().await;
    let embedder = OpenAiEmbedder::new("sk-test".to_string(), &settings_for(&server.url(), 2)).unwrap();
    let err = embedder.embed_batch(&["a".to_string(), "b".to_string()]).await.unwrap_err();
    assert!(matches!(err, Error::BatchUnavailable(_)), "{err}");
}

#[tokio::test]
async fn openai_single_embed_sends_string_input() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/embeddings")
        .match_body(Matcher::PartialJson(json!({"input": "tek metin"})))
        .with_status(200)
        .with_body(json!({"data": [{"index": 0, "embedding": [0.6, 0.8]}]}).to_string())
        .create_async()
        .await;
    let embedder = OpenAiEmbedder::new("sk-test".to_string(), &settings_for(&server.url(), 2)).unwrap();
    assert_eq!(embedder.embed("tek metin").await.unwrap(), vec![0.6, 0.8]);
    mock.assert_async().await;
}

#[tokio::test]
async fn openai_server_error_and_bad_dimension() {
    let mut server = mockito::Server::new_async().await;
    let _fail = server
        .mock("POST", "/v1/embeddings")
        .match_body(Matcher::PartialJson(json!({"input": "boom"})))
        .with_status(500)
        .with_body("upstream down")
        .create_async()
        .await;
    let _short = server
        .mock("POST", "/v1/embeddings")
        .match_body(Matcher::PartialJson(json!({"input": "short"})))
        .with_status(200)
        .with_body(json!({"data": [{"index": 0, "embedding": [1.0]}]}).to_string())
        .create_async()
        .await;
    let embedder = OpenAiEmbedder::new("sk-test".to_string(), &settings_for(&server.url(), 2)).unwrap();

    let err = embedder.embed("boom").await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingUnavailable(_)), "{err}");
    let err = embedder.embed("short").await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 2, got: 1 }), "{err}");
}

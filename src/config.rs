//! Carga y gestión de configuración de la aplicación (LLM + almacenamiento local).

use std::{env, fmt, path::PathBuf, str::FromStr};

use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone)]
pub struct AppConfig {
    pub server_addr: String,
    pub frontend_dir: PathBuf,
    pub open_browser: bool,

    pub llm_provider: LlmProvider,
    pub openai_api_key: String,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,

    pub upload_dir: PathBuf,
    pub vector_db_path: PathBuf,
    pub max_upload_bytes: usize,
    pub index_sync: bool,

    pub sentence_window: usize,
    pub rag_top_k: usize,
    pub rag_min_score: f64,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de claves.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let llm_provider = LlmProvider::from_str(
            &lookup("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string()),
        )?;

        let openai_api_key = lookup("OPENAI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("Falta OPENAI_API_KEY en el entorno"))?;

        let server_addr = lookup("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());
        let frontend_dir =
            PathBuf::from(lookup("FRONTEND_DIR").unwrap_or_else(|| "frontend".to_string()));

        let llm_embedding_model = lookup("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|| "text-embedding-3-small".to_string());
        let llm_chat_model = lookup("LLM_CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());

        let upload_dir = PathBuf::from(lookup("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string()));
        let vector_db_path =
            PathBuf::from(lookup("VECTOR_DB_PATH").unwrap_or_else(|| "vector_db".to_string()));

        let max_upload_mb: usize = parse_or(&lookup, "MAX_UPLOAD_MB", 25)?;
        let rag_top_k: usize = parse_or(&lookup, "RAG_TOP_K", 4)?;
        if rag_top_k == 0 {
            return Err(anyhow!("RAG_TOP_K debe ser mayor que 0"));
        }

        Ok(Self {
            server_addr,
            frontend_dir,
            open_browser: parse_or(&lookup, "OPEN_BROWSER", true)?,
            llm_provider,
            openai_api_key,
            llm_embedding_model,
            llm_chat_model,
            upload_dir,
            vector_db_path,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            index_sync: parse_or(&lookup, "INDEX_SYNC", false)?,
            sentence_window: parse_or(&lookup, "SENTENCE_WINDOW", 5)?,
            rag_top_k,
            rag_min_score: parse_or(&lookup, "RAG_MIN_SCORE", 0.0)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Valor inválido para {key}: '{raw}'")),
        _ => Ok(default),
    }
}

// La clave de la API nunca debe acabar en los logs.
impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("server_addr", &self.server_addr)
            .field("frontend_dir", &self.frontend_dir)
            .field("llm_provider", &self.llm_provider)
            .field("openai_api_key", &"***")
            .field("llm_embedding_model", &self.llm_embedding_model)
            .field("llm_chat_model", &self.llm_chat_model)
            .field("upload_dir", &self.upload_dir)
            .field("vector_db_path", &self.vector_db_path)
            .field("index_sync", &self.index_sync)
            .field("rag_top_k", &self.rag_top_k)
            .field("rag_min_score", &self.rag_min_score)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn uses_defaults_when_only_api_key_is_set() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("OPENAI_API_KEY", "sk-test")])).unwrap();

        assert_eq!(cfg.llm_provider, LlmProvider::OpenAI);
        assert_eq!(cfg.server_addr, "127.0.0.1:3322");
        assert_eq!(cfg.llm_embedding_model, "text-embedding-3-small");
        assert_eq!(cfg.llm_chat_model, "gpt-4o-mini");
        assert_eq!(cfg.upload_dir, PathBuf::from("uploads"));
        assert_eq!(cfg.vector_db_path, PathBuf::from("vector_db"));
        assert_eq!(cfg.rag_top_k, 4);
        assert_eq!(cfg.sentence_window, 5);
        assert_eq!(cfg.max_upload_bytes, 25 * 1024 * 1024);
        assert!(!cfg.index_sync);
        assert!(cfg.open_browser);
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        assert!(AppConfig::from_lookup(lookup_from(&[("OPENAI_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("LLM_PROVIDER", "OpenAI"),
            ("RAG_TOP_K", "8"),
            ("RAG_MIN_SCORE", "0.35"),
            ("INDEX_SYNC", "true"),
            ("OPEN_BROWSER", "false"),
            ("VECTOR_DB_PATH", "/tmp/vectors"),
        ]))
        .unwrap();

        assert_eq!(cfg.rag_top_k, 8);
        assert!((cfg.rag_min_score - 0.35).abs() < f64::EPSILON);
        assert!(cfg.index_sync);
        assert!(!cfg.open_browser);
        assert_eq!(cfg.vector_db_path, PathBuf::from("/tmp/vectors"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("RAG_TOP_K", "muchos"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RAG_TOP_K"));

        assert!(AppConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("RAG_TOP_K", "0"),
        ]))
        .is_err());

        assert!(AppConfig::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("LLM_PROVIDER", "gemini"),
        ]))
        .is_err());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let cfg = AppConfig::from_lookup(lookup_from(&[("OPENAI_API_KEY", "sk-secreta")])).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("sk-secreta"));
    }
}

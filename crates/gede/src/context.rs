// Session state shared by the REPL and command handlers.

use std::io::Write;
use std::sync::Arc;

use gede_llm::mcp::McpServers;
use gede_llm::models::{ModelCatalog, ModelInfo};
use gede_llm::runner::RunOptions;
use gede_llm::tools::ToolFunctions;

use anyhow::Context as _;
use tracing::{error, info};

use crate::chat::{Chat, ChatStore};
use crate::config::{Config, GedeDirs};
use crate::display::Notifier;
use crate::providers::{EnabledModels, ProviderRegistry};
use crate::tools::builtin_tools;

pub struct Context<W: Write> {
    pub config: Config,
    pub dirs: GedeDirs,
    pub store: ChatStore,
    pub chat: Chat,
    pub registry: Arc<ProviderRegistry>,
    pub catalog: ModelCatalog,
    pub models: EnabledModels,
    pub tools: ToolFunctions,
    pub mcp_servers: McpServers,
    pub notifier: Notifier<W>,
}

impl<W: Write> Context<W> {
    /// Prepare directories, the model catalog, providers and enabled models.
    /// MCP servers are connected separately.
    pub async fn initialize(config: Config, dirs: GedeDirs, notifier: Notifier<W>) -> anyhow::Result<Self> {
        dirs.ensure().context("failed to create gede directories")?;

        let catalog = ModelCatalog::new(&dirs.cache(), config.models.catalog_url.clone());
        if let Err(e) = catalog.load().await {
            error!("failed to load model catalog: {e}");
        }
        info!(count = catalog.len().await, "model catalog ready");

        let registry = Arc::new(ProviderRegistry::from_config(&config.providers));
        let models = EnabledModels::prepare(&dirs.data().join("models.json"), &registry, &catalog)
            .await
            .context("failed to prepare enabled models")?;

        let tools = if config.chat.builtin_tools {
            builtin_tools()
        } else {
            ToolFunctions::new()
        };

        let mut chat = Chat::new(false, &config.chat.instruction, &config.chat.default_model);
        chat.message_num_in_context = config.chat.message_num_in_context;

        Ok(Self {
            store: ChatStore::new(&dirs),
            chat,
            config,
            dirs,
            registry,
            catalog,
            models,
            tools,
            mcp_servers: McpServers::new(),
            notifier,
        })
    }

    /// A chat configured from `config.toml`, keeping the current model.
    pub fn new_chat(&self, private: bool) -> Chat {
        let mut chat = Chat::new(private, &self.config.chat.instruction, &self.chat.model_path);
        chat.message_num_in_context = self.config.chat.message_num_in_context;
        chat
    }

    pub async fn model_info(&self) -> Option<ModelInfo> {
        self.catalog.get(&self.chat.model_path).await
    }

    /// Chat summary plus the tools and MCP servers in use.
    pub async fn chat_info(&self) -> String {
        let model = self.model_info().await;
        let tools = if self.tools.is_empty() {
            "None".to_string()
        } else {
            self.tools.names().join(",")
        };
        let servers = if self.mcp_servers.is_empty() {
            "None".to_string()
        } else {
            self.mcp_servers.keys().cloned().collect::<Vec<_>>().join(",")
        };
        format!(
            "{}\nUsing Tools: {tools}\nUsing MCP Servers: {servers}",
            self.chat.info(model.as_ref())
        )
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            tools: Some(self.tools.clone()).filter(|t| !t.is_empty()),
            mcp_servers: Some(self.mcp_servers.clone()).filter(|s| !s.is_empty()),
            max_rounds: self.config.chat.max_rounds,
            response_format: None,
        }
    }
}

use super::*;

/// Name-keyed tool table built once at startup.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
    max_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

impl ToolRegistry {
    pub fn new(max_timeout: Duration) -> Self {
        Self {
            tools: BTreeMap::new(),
            max_timeout,
        }
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_owned(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(Box::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn schemas(&self) -> Vec<FunctionDecl> {
        self.tools.values().map(|tool| tool.schema()).collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        tenant_id: &str,
        args: &Value,
    ) -> Result<Value, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::UnknownTool {
            tool: name.to_owned(),
        })?;

        let timeout = tool.timeout().min(self.max_timeout);
        tracing::debug!(
            tool = name,
            tenant_id,
            ?timeout,
            "executing tool"
        );
        tokio::time::timeout(timeout, tool.execute(tenant_id, args))
            .await
            .map_err(|_| ToolError::TimedOut {
                tool: name.to_owned(),
                timeout,
            })?
    }
}

/// Registry holding every business tool, publishing on `events`.
pub fn default_registry(events: EventBus, max_timeout: Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new(max_timeout);
    registry.register(BookTourTool::new(events.clone()));
    registry.register(TakeNoteTool::new(events.clone()));
    registry.register(UpdateContactInfoTool::new(events));
    registry
}

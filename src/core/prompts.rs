use anyhow::{Result, anyhow};
use moka::sync::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const CACHE_CAPACITY: u64 = 64;

/// Prompt templates are markdown files under the prompts directory, keyed by
/// relative path without extension ("system/chat", "tools/interview"). A
/// template that cannot be found is treated as misconfiguration, not a
/// recoverable runtime condition.
pub struct PromptStore {
    dir: PathBuf,
    cache: Cache<String, Arc<String>>,
}

impl PromptStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(anyhow!(
                "prompts directory not found: {} (misconfigured installation)",
                dir.display()
            ));
        }
        Ok(Self {
            dir,
            cache: Cache::new(CACHE_CAPACITY),
        })
    }

    /// Bounded LRU lookup. Concurrent callers for the same missing key share
    /// a single load; the second caller waits for the first load's result.
    pub fn get(&self, template_id: &str) -> Result<Arc<String>> {
        let dir = self.dir.clone();
        let id = template_id.to_string();
        self.cache
            .try_get_with(id.clone(), move || {
                let path = dir.join(format!("{}.md", id));
                std::fs::read_to_string(&path)
                    .map(|raw| Arc::new(raw.trim().to_string()))
                    .map_err(|_| anyhow!("prompt template not found: {}", id))
            })
            .map_err(|e| anyhow!("{}", e))
    }

    /// Startup preload so a missing template dies before serving state.
    pub fn preload(&self, template_ids: &[&str]) -> Result<()> {
        for id in template_ids {
            self.get(id)?;
        }
        info!("Loaded {} prompt templates", template_ids.len());
        Ok(())
    }
}

const DEFAULT_TEMPLATES: [(&str, &str); 9] = [
    (
        "system/chat",
        "You are a pragmatic personal chief of staff. Answer briefly and concretely. \
When you do not know something, say so instead of inventing it.",
    ),
    (
        "system/triage",
        "You help the user triage their inbox. Group what you are told about into \
urgent, needs-reply, and can-wait, and propose the next three actions. Be terse.",
    ),
    (
        "system/summarizer",
        "Summarize the provided material into a few tight bullet points. Keep names, \
dates, and commitments. Drop pleasantries.",
    ),
    (
        "system/writer",
        "Draft the message the user asks for in their voice: plain, direct, polite. \
Return only the draft body, no commentary.",
    ),
    (
        "tools/navigation",
        "Decide whether the user wants to move to another part of the app. Known \
targets: inbox, tasks, calendar, digest, settings. Reply with JSON only: \
{\"wants_navigation\": bool, \"target\": string, \"confidence\": number between 0 and 1}.",
    ),
    (
        "tools/digest",
        "Build a short daily digest from the provided items: what happened, what \
needs attention today, and one thing that can be dropped.",
    ),
    (
        "tools/interview",
        "You occasionally ask the user one sharp question to better understand their \
priorities. Given their recent activity, return exactly one question, nothing else.",
    ),
    (
        "tools/links",
        "Find items in the list that belong together (same thread, same project, same \
person). Reply with JSON only: an array of {\"items\": [ids], \"reason\": string}.",
    ),
    (
        "tools/tasks",
        "Extract concrete action items from the provided items. Reply with JSON only: \
an array of {\"task\": string, \"source\": id, \"due\": string or null}.",
    ),
];

/// First-run bootstrap: writes the built-in templates into the prompts
/// directory, never overwriting files the user has edited.
pub fn seed_default_templates(dir: &Path) -> Result<()> {
    for (id, body) in DEFAULT_TEMPLATES {
        let path = dir.join(format!("{}.md", id));
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, format!("{}\n", body))?;
    }
    Ok(())
}

//! Prompt text for the generation, fix and summary turns.

use crate::models::Framework;

fn framework_notes(framework: Framework) -> &'static str {
    match framework {
        Framework::Nextjs => {
            "The project is a Next.js app using the App Router and TypeScript. \
             Pages live under app/, shared components under components/. \
             Tailwind CSS is installed."
        }
        Framework::React => {
            "The project is a React app built with Vite and TypeScript. \
             The entry point is src/main.tsx and the root component is src/App.tsx."
        }
        Framework::Vue => {
            "The project is a Vue 3 app built with Vite and TypeScript using \
             single-file components. The root component is src/App.vue."
        }
        Framework::Angular => {
            "The project is an Angular app using standalone components. \
             The root component is src/app/app.component.ts."
        }
        Framework::Svelte => {
            "The project is a SvelteKit app with TypeScript. \
             Routes live under src/routes/."
        }
    }
}

/// System prompt for every agent pass.
pub fn system_prompt(framework: Framework, workspace_root: &str) -> String {
    format!(
        "You are a senior software engineer building a web application inside a sandbox.\n\
         \n\
         {notes}\n\
         The workspace root is {root}. The dev server already runs on port {port} \
         with hot reload, so never start it yourself.\n\
         \n\
         Tools:\n\
         - write_files: create or overwrite files. Use paths relative to the workspace root.\n\
         - read_files: read existing files before changing them.\n\
         - run_command: run a shell command, e.g. to install a package with `{install}`.\n\
         \n\
         Write complete files, never placeholders. Keep the app production quality and \
         responsive.\n\
         \n\
         When the task is finished, reply without calling any tool and include a short \
         summary wrapped in <task_summary></task_summary>.",
        notes = framework_notes(framework),
        root = workspace_root,
        port = framework.dev_port(),
        install = "npm install <package> --yes",
    )
}

/// User turn that starts an auto-fix pass.
pub fn fix_prompt(original_prompt: &str, files: &[&str], errors: &str) -> String {
    let listing = if files.is_empty() {
        "(none)".to_string()
    } else {
        files.join("\n")
    };
    format!(
        "The project you built for this request fails validation:\n\
         \n\
         {original_prompt}\n\
         \n\
         Files written so far:\n\
         {listing}\n\
         \n\
         Errors:\n\
         {errors}\n\
         \n\
         Find the root cause and fix it. Read the affected files before editing them. \
         Do not silence errors by deleting features or disabling checks. When done, reply \
         with an updated <task_summary></task_summary>."
    )
}

/// Forced re-prompt when the agent wrote files but gave no summary.
pub const SUMMARY_REQUEST: &str = "You did not include a task summary. Reply with a short \
    description of what you built, wrapped in <task_summary></task_summary>. Do not call any tools.";

pub const TITLE_SYSTEM: &str = "You name software projects. Reply with a short title of at \
    most five words for the project described. Reply with the title only, no quotes or punctuation.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_port_and_root() {
        let prompt = system_prompt(Framework::Vue, "/home/user");
        assert!(prompt.contains("port 5173"));
        assert!(prompt.contains("/home/user"));
        assert!(prompt.contains("<task_summary>"));
    }

    #[test]
    fn fix_prompt_carries_errors_and_files() {
        let prompt = fix_prompt("a todo app", &["app/page.tsx"], "Type error: x");
        assert!(prompt.contains("a todo app"));
        assert!(prompt.contains("app/page.tsx"));
        assert!(prompt.contains("Type error: x"));
        assert!(fix_prompt("p", &[], "e").contains("(none)"));
    }
}

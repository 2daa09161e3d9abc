//! Minimum file set the sandbox image needs to boot a Vite/React project.
//! Defaults are injected only when the project does not provide its own
//! version of a file, so a half-finished project still previews.

use std::collections::BTreeMap;

/// One file the preview environment cannot boot without.
#[derive(Debug, Clone, Copy)]
pub struct ScaffoldEntry {
    pub path: &'static str,
    pub content: &'static str,
}

pub const ESSENTIAL_FILES: &[ScaffoldEntry] = &[
    ScaffoldEntry {
        path: "/index.html",
        content: DEFAULT_INDEX_HTML,
    },
    ScaffoldEntry {
        path: "/package.json",
        content: DEFAULT_PACKAGE_JSON,
    },
    ScaffoldEntry {
        path: "/vite.config.js",
        content: DEFAULT_VITE_CONFIG,
    },
    ScaffoldEntry {
        path: "/src/main.jsx",
        content: DEFAULT_MAIN_JSX,
    },
    ScaffoldEntry {
        path: "/src/index.css",
        content: DEFAULT_INDEX_CSS,
    },
];

/// Fill in any essential file the map is missing. Existing entries are
/// never overwritten.
pub fn apply_defaults(files: &mut BTreeMap<String, String>) {
    for entry in ESSENTIAL_FILES {
        if !files.contains_key(entry.path) {
            files.insert(entry.path.to_string(), entry.content.to_string());
        }
    }
}

const DEFAULT_INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Preview</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>
"#;

const DEFAULT_PACKAGE_JSON: &str = r#"{
  "name": "preview-app",
  "private": true,
  "version": "0.0.0",
  "type": "module",
  "scripts": {
    "dev": "vite",
    "build": "vite build"
  },
  "dependencies": {
    "react": "^18.3.1",
    "react-dom": "^18.3.1"
  },
  "devDependencies": {
    "@vitejs/plugin-react": "^4.3.1",
    "vite": "^5.4.2"
  }
}
"#;

const DEFAULT_VITE_CONFIG: &str = r#"import { defineConfig } from "vite";
import react from "@vitejs/plugin-react";

export default defineConfig({
  plugins: [react()],
  server: {
    host: true,
  },
});
"#;

const DEFAULT_MAIN_JSX: &str = r#"import { createRoot } from "react-dom/client";
import "./index.css";

createRoot(document.getElementById("root")).render(
  <main className="placeholder">
    <h1>Preview ready</h1>
    <p>Edit a file to see changes live.</p>
  </main>
);
"#;

const DEFAULT_INDEX_CSS: &str = r#":root {
  font-family: system-ui, sans-serif;
  color-scheme: light dark;
}

body {
  margin: 0;
}

.placeholder {
  display: grid;
  place-items: center;
  min-height: 100vh;
  text-align: center;
}
"#;

use axum::{extract::State, response::Html, Json};

use crate::http::server::AppState;
use crate::load_balancer::BackendSnapshot;

/// Every known backend, members or not, taken under one pool lock.
pub async fn get_stats(State(state): State<AppState>) -> Json<Vec<BackendSnapshot>> {
    Json(state.pool.snapshot())
}

pub async fn get_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>least-conn-proxy</title>
<style>
  body { font-family: sans-serif; margin: 2rem; }
  table { border-collapse: collapse; }
  th, td { padding: 0.4rem 0.8rem; border-bottom: 1px solid #ddd; text-align: left; }
  .up { color: #1a7f37; }
  .down { color: #cf222e; }
</style>
</head>
<body>
<h1>Backends</h1>
<table>
  <thead>
    <tr><th>Name</th><th>URL</th><th>Weight</th><th>Health</th><th>Active</th></tr>
  </thead>
  <tbody id="rows"></tbody>
</table>
<script>
async function refresh() {
  try {
    const res = await fetch('/stats');
    const backends = await res.json();
    const rows = document.getElementById('rows');
    rows.innerHTML = '';
    for (const b of backends) {
      const tr = document.createElement('tr');
      const cells = [b.name, b.url, b.weight, b.health ? 'up' : 'down', b.active_connections];
      cells.forEach((value, i) => {
        const td = document.createElement('td');
        td.textContent = value;
        if (i === 3) td.className = b.health ? 'up' : 'down';
        tr.appendChild(td);
      });
      rows.appendChild(tr);
    }
  } catch (e) {
    console.error('stats fetch failed', e);
  }
}
refresh();
setInterval(refresh, 1000);
</script>
</body>
</html>
"#;

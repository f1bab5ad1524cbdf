use axum::{
    extract::{Path, Query, State},
    response::Html,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{error::AppError, models::ItemKind, state::AppState};

#[derive(Deserialize)]
pub struct PlayerQuery {
    pub user: String,
}

fn media_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with('/') {
        url.to_string()
    } else {
        // ServeDir is mounted at /content; item urls are relative to DATA_DIR
        format!("/content/{url}")
    }
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Encodes `s` as a JS string literal that is safe inside an inline script.
fn js_string(s: &str) -> String {
    serde_json::to_string(s)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

/// Browser shell for one item: polls the media element, reports samples, keeps
/// unsaved progress in localStorage and flushes it with a beacon on unload.
pub async fn player_shell(
    State(state): State<AppState>,
    Path((course_id, item_id)): Path<(Uuid, Uuid)>,
    Query(q): Query<PlayerQuery>,
) -> Result<Html<String>, AppError> {
    let items = state.store.course_items(course_id).await?;
    let item = items
        .into_iter()
        .find(|i| i.id == item_id)
        .ok_or(AppError::NotFound("item"))?;

    let user = js_string(&q.user);
    let title = escape_attr(&item.title);
    let src = escape_attr(&media_url(&item.url));
    let media = match item.kind {
        ItemKind::Video => {
            format!("<video id='media' src='{src}' controls preload='metadata'></video>")
        }
        ItemKind::Slide => format!(
            "<iframe id='media' src='{src}'></iframe><button id='viewed'>Mark as viewed</button>"
        ),
    };
    let interval_ms = state.config.sample_interval.as_millis();

    let html = format!(
    r#"<!DOCTYPE html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>{title}</title>
  <style>
    html,body{{height:100%;width:100%;margin:0;padding:0;border:0}}
    .bar{{position:fixed;top:0;left:0;right:0;height:36px;background:#eee;border-bottom:1px solid #ddd;display:flex;align-items:center;gap:8px;padding:0 8px;z-index:2}}
    #media{{position:absolute;top:36px;left:0;right:0;bottom:0;width:100%;height:calc(100% - 36px);border:0;background:#000}}
    #viewed{{position:fixed;right:12px;bottom:12px;z-index:3}}
  </style>
</head>
<body>
<div class='bar'>{title} <span id='pct'></span> <span id='status'></span></div>
{media}
<script>
(function(){{
  const base = '/api/progress/' + encodeURIComponent({user}) + '/{course_id}/{item_id}';
  const cacheKey = 'progress:' + {user} + ':{course_id}:{item_id}';
  const el = document.getElementById('media');
  let locked = false;

  function cached(){{
    try {{ return JSON.parse(localStorage.getItem(cacheKey) || 'null'); }} catch(e){{ return null; }}
  }}
  function remember(p){{
    if (!p) return;
    if (p.saved) {{ localStorage.removeItem(cacheKey); return; }}
    localStorage.setItem(cacheKey, JSON.stringify({{
      watched_time: p.watched_time, percentage: p.percentage,
      last_marker: p.last_marker, completed: p.completed
    }}));
  }}
  function show(p){{
    if (!p) return;
    document.getElementById('pct').textContent = p.percentage.toFixed(0) + '%';
    document.getElementById('status').textContent = p.saved ? 'saved' : '';
  }}

  async function post(path, body){{
    const res = await fetch(base + '/' + path, {{
      method:'POST',
      headers:{{'content-type':'application/json'}},
      body: JSON.stringify(body||{{}})
    }});
    const j = await res.json().catch(()=>({{}}));
    if (res.status === 403) {{
      locked = true;
      document.getElementById('status').textContent = j.error || 'locked';
      if (el.pause) el.pause();
    }}
    return j;
  }}

  async function report(trigger){{
    if (locked || !el.duration || !isFinite(el.duration)) return;
    const state = el.ended ? 'ended' : (el.paused ? 'paused' : 'playing');
    const j = await post('sample', {{ current_time: el.currentTime, duration: el.duration, state, trigger }});
    if (j && j.progress) {{ remember(j.progress); show(j.progress); }}
    if (j && j.quiz_unlocked) {{
      window.dispatchEvent(new CustomEvent('quiz-unlocked', {{ detail: j.quiz_unlocked }}));
    }}
  }}

  post('open', {{ cached: cached() }}).then(j => {{
    if (j && j.progress) {{
      remember(j.progress); show(j.progress);
      if (el.tagName === 'VIDEO' && j.progress.watched_time > 0) {{
        el.addEventListener('loadedmetadata', () => {{ el.currentTime = Math.min(j.progress.watched_time, el.duration); }}, {{ once: true }});
      }}
    }}
  }});

  if (el.tagName === 'VIDEO') {{
    setInterval(() => {{ if (!el.paused) report('tick'); }}, {interval_ms});
    ['play','pause','ended','seeked'].forEach(ev => el.addEventListener(ev, () => report('state_change')));
  }} else {{
    document.getElementById('viewed').addEventListener('click', () =>
      post('viewed').then(j => {{ if (j && j.progress) {{ remember(j.progress); show(j.progress); }} }}));
  }}

  window.addEventListener('pagehide', () => {{
    const blob = new Blob([JSON.stringify(cached() || {{}})], {{ type: 'application/json' }});
    navigator.sendBeacon(base + '/unload', blob);
  }});
}})();
</script>
</body>
</html>"#,
    );

    Ok(Html(html))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_urls_are_served_from_content() {
        assert_eq!(media_url("course/intro.mp4"), "/content/course/intro.mp4");
        assert_eq!(media_url("https://cdn.example.com/a.mp4"), "https://cdn.example.com/a.mp4");
    }

    #[test]
    fn attributes_are_escaped() {
        assert_eq!(escape_attr("a'b<c>"), "a&#39;b&lt;c&gt;");
    }

    #[test]
    fn user_ids_reach_scripts_unmangled() {
        assert_eq!(js_string("o'neil & co"), r#""o'neil & co""#);
        assert_eq!(js_string("a\"b"), r#""a\"b""#);
        assert_eq!(js_string("</script>"), r#""<\/script>""#);
    }
}

//! Page-side programs. Each is a JavaScript function expression that takes a
//! single JSON argument and returns a JSON-serializable value.
//!
//! All of them are read-only except `HIGHLIGHT` (adds a temporary overlay)
//! and `SUBMIT` (submits a form).

/// Collects salient information about every element matching one of
/// `args.selectors`, in document order.
///
/// Args: `{ selectors: [string], textLimit: number, react: string, vue: string }`.
/// Returns: `{ elements: [object], framework: "react" | "vue" | null }`.
pub const EXTRACT_ELEMENTS: &str = r#"
(args) => {
  const collect = () => {
    try {
      return Array.from(document.querySelectorAll(args.selectors.join(', ')));
    } catch (e) {
      const seen = new Set();
      for (const sel of args.selectors) {
        try { document.querySelectorAll(sel).forEach(n => seen.add(n)); } catch (_) {}
      }
      return Array.from(seen).sort((a, b) =>
        a.compareDocumentPosition(b) & Node.DOCUMENT_POSITION_FOLLOWING ? -1 : 1);
    }
  };
  const matches = (el, sel) => { try { return el.matches(sel); } catch (_) { return false; } };
  const describe = (el) => {
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    const attr = (n) => el.getAttribute(n) || undefined;
    return {
      tag: el.tagName.toLowerCase(),
      id: el.id || undefined,
      name: attr('name'),
      value: (typeof el.value === 'string' && el.value) ? el.value : undefined,
      href: attr('href'),
      placeholder: attr('placeholder'),
      ariaLabel: attr('aria-label'),
      role: attr('role'),
      title: el.title || undefined,
      text: (el.textContent || '').replace(/\s+/g, ' ').trim().substring(0, args.textLimit),
      classes: typeof el.className === 'string' ? el.className : undefined,
      visible: rect.width > 0 && rect.height > 0
        && style.display !== 'none' && style.visibility !== 'hidden',
      frameworkMarker: matches(el, args.react) || matches(el, args.vue)
    };
  };
  const elements = [];
  for (const el of collect()) {
    try { elements.push(describe(el)); } catch (_) {}
  }
  let framework = null;
  try {
    if (document.querySelector(args.react)) framework = 'react';
    else if (document.querySelector(args.vue)) framework = 'vue';
  } catch (_) {}
  return { elements, framework };
}
"#;

/// Args: `{ limit: number }`. Returns a string.
pub const MAIN_CONTENT: &str = r#"
(args) => {
  const mainSelectors = ['main', '[role="main"]', '#main-content', '#content', 'article', '.main-content'];
  for (const sel of mainSelectors) {
    const el = document.querySelector(sel);
    if (el) return (el.innerText || '').substring(0, args.limit);
  }
  const nodes = Array.from(document.body.querySelectorAll('p, h1, h2, h3, h4, h5, h6'))
    .filter(el => el.innerText.trim().length > 0);
  if (nodes.length > 0) {
    return nodes.map(n => n.innerText).join('\n\n').substring(0, args.limit);
  }
  return 'No main content found';
}
"#;

/// Args: none. Returns an object or null.
pub const FOCUSED_ELEMENT: &str = r#"
(args) => {
  const active = document.activeElement;
  if (!active || active === document.body) return null;
  return {
    tag: active.tagName.toLowerCase(),
    type: active.type || undefined,
    id: active.id || undefined,
    name: active.name || undefined,
    value: active.value || undefined,
    placeholder: active.placeholder || undefined,
    ariaLabel: active.getAttribute('aria-label') || undefined
  };
}
"#;

/// Counts matches for many path expressions in one round trip. Visibility is
/// reported only for expressions with exactly one match.
///
/// Args: `{ selectors: [string] }`.
/// Returns: `[{ count: number, visible: bool, error?: string }]`, same order.
pub const PROBE_BATCH: &str = r#"
(args) => {
  const visible = (el) => {
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    return rect.width > 0 && rect.height > 0 && style.display !== 'none' && style.visibility !== 'hidden';
  };
  return args.selectors.map(sel => {
    try {
      const snap = document.evaluate(sel, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
      const count = snap.snapshotLength;
      return { count, visible: count === 1 && visible(snap.snapshotItem(0)) };
    } catch (e) {
      return { count: 0, visible: false, error: String(e) };
    }
  });
}
"#;

/// Single-expression variant of `PROBE_BATCH` that also describes up to
/// `args.limit` matches so an ambiguous locator can be reported.
///
/// Args: `{ selector: string, limit: number }`.
/// Returns: `{ count, visible, matches: [string], error?: string }`.
pub const DESCRIBE_MATCHES: &str = r#"
(args) => {
  const visible = (el) => {
    const rect = el.getBoundingClientRect();
    const style = window.getComputedStyle(el);
    return rect.width > 0 && rect.height > 0 && style.display !== 'none' && style.visibility !== 'hidden';
  };
  try {
    const snap = document.evaluate(args.selector, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    const count = snap.snapshotLength;
    const matches = [];
    for (let i = 0; i < Math.min(count, args.limit); i++) {
      const el = snap.snapshotItem(i);
      const html = el.outerHTML || el.textContent || '';
      matches.push(html.replace(/\s+/g, ' ').substring(0, 160));
    }
    return { count, visible: count === 1 && visible(snap.snapshotItem(0)), matches };
  } catch (e) {
    return { count: 0, visible: false, matches: [], error: String(e) };
  }
}
"#;

/// Outlines the first match of `args.selector` for `args.duration` ms.
///
/// Args: `{ selector: string, color: string, duration: number }`.
/// Returns: `{ count: number }`.
pub const HIGHLIGHT: &str = r#"
(args) => {
  const snap = document.evaluate(args.selector, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
  if (snap.snapshotLength === 0) return { count: 0 };
  const rect = snap.snapshotItem(0).getBoundingClientRect();
  const div = document.createElement('div');
  div.style.cssText = `position: absolute; z-index: 9999; pointer-events: none;
    border: 2px solid ${args.color};
    left: ${rect.x + window.scrollX}px; top: ${rect.y + window.scrollY}px;
    width: ${rect.width}px; height: ${rect.height}px;`;
  document.body.appendChild(div);
  setTimeout(() => { if (div.parentNode) div.parentNode.removeChild(div); }, args.duration);
  return { count: snap.snapshotLength };
}
"#;

/// Submits the form owning the first match of `args.selector`.
///
/// Returns `"submitted"`, `"no-form"` (caller should press Enter) or `"missing"`.
pub const SUBMIT: &str = r#"
(args) => {
  const el = document.evaluate(args.selector, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
  if (!el) return 'missing';
  const form = el.form || (el.tagName === 'FORM' ? el : el.closest('form'));
  if (!form) { el.focus(); return 'no-form'; }
  if (typeof form.requestSubmit === 'function') form.requestSubmit(); else form.submit();
  return 'submitted';
}
"#;

/// Scrolls the first match into view and clears its value.
pub const PREPARE_INPUT: &str = r#"
(args) => {
  const el = document.evaluate(args.selector, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue;
  if (!el) return false;
  el.scrollIntoView({ block: 'center' });
  if ('value' in el) el.value = '';
  el.focus();
  return true;
}
"#;

/// Returns `document.readyState`.
pub const READY_STATE: &str = "(args) => document.readyState";

/// Clicks whatever element sits at viewport position `(args.x, args.y)`.
///
/// Returns the clicked element's tag, or null when the point is empty.
pub const CLICK_AT: &str = r#"
(args) => {
  const el = document.elementFromPoint(args.x, args.y);
  if (!el) return null;
  const init = { bubbles: true, cancelable: true, view: window, clientX: args.x, clientY: args.y };
  el.dispatchEvent(new MouseEvent('mousedown', init));
  el.dispatchEvent(new MouseEvent('mouseup', init));
  el.click();
  return el.tagName.toLowerCase();
}
"#;

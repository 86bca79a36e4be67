//! In-page scripts evaluated through [`BrowserDriver::evaluate`].
//!
//! [`BrowserDriver::evaluate`]: crate::BrowserDriver::evaluate

/// Returns `document.readyState`
pub const READY_STATE_SCRIPT: &str = "return document.readyState;";

/// Returns the URL of the current context
pub const LOCATION_SCRIPT: &str = "return location.href;";

/// Lists `{index, name, src}` for every frame of the current document
pub const LIST_FRAMES_SCRIPT: &str = r#"
    return Array.from(document.querySelectorAll('iframe, frame')).map(function (f, i) {
        return { index: i, name: f.getAttribute('name') || f.id || '', src: f.src || '' };
    });
"#;

/// Bounding box of frame `arguments[0]`, or of the viewport when the index is negative.
/// Hidden frames report a zero size.
pub const FRAME_RECT_SCRIPT: &str = r#"
    var index = arguments[0];
    if (index < 0) {
        return { x: 0, y: 0, width: window.innerWidth, height: window.innerHeight };
    }
    var f = document.querySelectorAll('iframe, frame')[index];
    if (!f) { return null; }
    var r = f.getBoundingClientRect();
    var s = window.getComputedStyle(f);
    var hidden = s.display === 'none' || s.visibility === 'hidden' || parseFloat(s.opacity) === 0;
    return {
        x: r.left,
        y: r.top,
        width: hidden ? 0 : r.width,
        height: hidden ? 0 : r.height
    };
"#;

/// Scrolls the window by `arguments[0]`, `arguments[1]`
pub const SCROLL_WINDOW_SCRIPT: &str = "window.scrollBy(arguments[0], arguments[1]); return null;";

/// Builds an accessibility-style outline of the current document: one line
/// per landmark, heading, control, link or text-bearing cell.
pub const OUTLINE_SCRIPT: &str = r#"
    var lines = [];
    var ROLE_BY_TAG = {
        A: 'link', BUTTON: 'button', INPUT: 'textbox', TEXTAREA: 'textbox', SELECT: 'combobox',
        H1: 'heading', H2: 'heading', H3: 'heading', H4: 'heading', NAV: 'navigation',
        MAIN: 'main', FORM: 'form', TABLE: 'table', TH: 'columnheader', TD: 'cell',
        LI: 'listitem', LABEL: 'label', OPTION: 'option', DIALOG: 'dialog'
    };
    function visible(el) {
        var s = window.getComputedStyle(el);
        if (s.display === 'none' || s.visibility === 'hidden') { return false; }
        var r = el.getBoundingClientRect();
        return r.width > 0 || r.height > 0;
    }
    function selectorOf(el) {
        if (el.id) { return '#' + el.id; }
        if (el.getAttribute('name')) { return el.tagName.toLowerCase() + '[name="' + el.getAttribute('name') + '"]'; }
        if (el.getAttribute('data-testid')) { return '[data-testid="' + el.getAttribute('data-testid') + '"]'; }
        return '';
    }
    function nameOf(el) {
        var label = el.getAttribute('aria-label') || el.getAttribute('placeholder') || el.getAttribute('title') || '';
        if (label) { return label; }
        if (el.tagName === 'INPUT' && el.type === 'submit') { return el.value || ''; }
        var text = (el.innerText || '').replace(/\s+/g, ' ').trim();
        return text.length > 80 ? text.slice(0, 80) + '…' : text;
    }
    function walk(el, depth) {
        if (!el || el.nodeType !== 1 || !visible(el)) { return; }
        var role = el.getAttribute('role') || ROLE_BY_TAG[el.tagName];
        var next = depth;
        if (role) {
            var name = nameOf(el);
            var sel = selectorOf(el);
            lines.push(new Array(depth + 1).join('  ') + '- ' + role + (name ? ' "' + name + '"' : '') + (sel ? ' [' + sel + ']' : ''));
            next = depth + 1;
            if (role === 'link' || role === 'button' || role === 'cell' || role === 'option') { return; }
        }
        for (var i = 0; i < el.children.length; i++) { walk(el.children[i], next); }
    }
    lines.push('document "' + document.title + '" ' + location.href);
    walk(document.body, 0);
    return lines.join('\n');
"#;

/// Finds the dominant scrollable container (largest scrollable area) and tags
/// it with `data-rove-scroll`. Returns `{found, scrollHeight, clientHeight}`,
/// describing the window when no inner container scrolls.
pub const FIND_SCROLL_CONTAINER_SCRIPT: &str = r#"
    var best = null;
    var bestArea = 0;
    var all = document.querySelectorAll('*');
    for (var i = 0; i < all.length; i++) {
        var el = all[i];
        el.removeAttribute('data-rove-scroll');
        if (el.scrollHeight <= el.clientHeight + 10) { continue; }
        var oy = window.getComputedStyle(el).overflowY;
        if (oy !== 'auto' && oy !== 'scroll') { continue; }
        var area = el.clientWidth * el.clientHeight;
        if (area > bestArea) { best = el; bestArea = area; }
    }
    if (best) {
        best.setAttribute('data-rove-scroll', '1');
        best.scrollTop = 0;
        return { found: true, scrollHeight: best.scrollHeight, clientHeight: best.clientHeight };
    }
    window.scrollTo(0, 0);
    return {
        found: false,
        scrollHeight: document.documentElement.scrollHeight,
        clientHeight: window.innerHeight
    };
"#;

/// Scrolls the tagged container (or the window) down by one viewport.
/// Returns `true` when the position changed.
pub const SCROLL_CONTAINER_SCRIPT: &str = r#"
    var el = document.querySelector('[data-rove-scroll]');
    if (el) {
        var before = el.scrollTop;
        el.scrollTop = before + el.clientHeight * 0.9;
        return el.scrollTop !== before;
    }
    var y = window.scrollY;
    window.scrollBy(0, window.innerHeight * 0.9);
    return window.scrollY !== y;
"#;

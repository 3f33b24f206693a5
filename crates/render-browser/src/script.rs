//! The script evaluated in the page once its execution context is ready.
//!
//! It starts a looping background audio track decoded from an embedded
//! M4A payload, so the page always produces an audio stream for capture,
//! and pins a wall-clock overlay to the bottom-right corner so frames can
//! be matched against real time. The script evaluates to `0`.

/// Low-level noise track, base64 M4A.
pub const NOISE_AUDIO_B64: &str = include_str!("../assets/noise.m4a.b64");

/// Silent track, base64 M4A.
pub const SILENT_AUDIO_B64: &str = include_str!("../assets/silence.m4a.b64");

const AUDIO_PLACEHOLDER: &str = "__AUDIO_BASE64__";

const SCRIPT_TEMPLATE: &str = r#"(() => {
  const toBlob = (b64, type, sliceSize = 512) => {
    const chars = atob(b64);
    const parts = [];
    for (let offset = 0; offset < chars.length; offset += sliceSize) {
      const slice = chars.slice(offset, offset + sliceSize);
      const bytes = new Uint8Array(slice.length);
      for (let i = 0; i < slice.length; i++) {
        bytes[i] = slice.charCodeAt(i);
      }
      parts.push(bytes);
    }
    return new Blob(parts, { type });
  };

  const label = document.createElement("span");
  label.style.fontSize = "14px";
  label.style.position = "fixed";
  label.style.zIndex = "10000";
  label.style.bottom = "5px";
  label.style.right = "5px";
  label.style.color = "rgba(200, 200, 200, 0.8)";
  setInterval(() => {
    const n = new Date();
    label.innerText = n.getFullYear() + "/" + (n.getMonth() + 1) + "/" + n.getDate()
      + " " + n.getHours() + ":" + n.getMinutes() + ":" + n.getSeconds();
  }, 1000);
  document.body.append(label);

  const audio = new Audio();
  audio.loop = true;
  audio.src = URL.createObjectURL(toBlob("__AUDIO_BASE64__", "audio/x-m4a"));
  audio.play();
  return 0;
})();"#;

/// The audio payload for the configured mode.
pub fn audio_payload(inject_noise: bool) -> &'static str {
    if inject_noise {
        NOISE_AUDIO_B64.trim()
    } else {
        SILENT_AUDIO_B64.trim()
    }
}

/// Build the injection script.
pub fn injection_script(inject_noise: bool) -> String {
    SCRIPT_TEMPLATE.replace(AUDIO_PLACEHOLDER, audio_payload(inject_noise))
}

// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::command::{self, CommandQueue};
use crate::driver::ShaderSource;

/**
A shader program that survives device loss.

The source is kept so the native program can be compiled again.
*/
#[derive(Debug)]
pub(crate) struct Shader {
    //None once disposed
    shader: Option<command::Shader>,
    source: ShaderSource,
}

impl Shader {
    pub fn new(queue: &mut CommandQueue, source: ShaderSource) -> Self {
        let shader = queue.new_shader(source.clone());
        Self {
            shader: Some(shader),
            source,
        }
    }

    pub fn source(&self) -> &ShaderSource {
        &self.source
    }

    pub fn command_shader(&self) -> command::Shader {
        match self.shader {
            Some(shader) => shader,
            None => panic!("restorable: the shader is already disposed"),
        }
    }

    pub fn restore(&mut self, queue: &mut CommandQueue) {
        self.shader = Some(queue.new_shader(self.source.clone()));
    }

    pub fn dispose(&mut self, queue: &mut CommandQueue) {
        if let Some(shader) = self.shader.take() {
            queue.dispose_shader(shader);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BuiltinShader;

    #[test]
    fn restore_recompiles_from_source() {
        let mut queue = CommandQueue::new(1024);
        let mut shader = Shader::new(&mut queue, ShaderSource::Builtin(BuiltinShader::Linear));
        let first = shader.command_shader();
        queue.reset();
        shader.restore(&mut queue);
        assert_ne!(first, shader.command_shader());
        assert_eq!(queue.len(), 1);
        assert_eq!(shader.source(), &ShaderSource::Builtin(BuiltinShader::Linear));
    }

    #[test]
    #[should_panic(expected = "already disposed")]
    fn disposed_shader_panics() {
        let mut queue = CommandQueue::new(1024);
        let mut shader = Shader::new(&mut queue, ShaderSource::Wgsl(String::new()));
        shader.dispose(&mut queue);
        shader.command_shader();
    }
}
